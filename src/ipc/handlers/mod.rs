pub mod core;
pub mod formulas;
pub mod grades;
