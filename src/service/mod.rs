mod model;

pub use model::ModelBase;
