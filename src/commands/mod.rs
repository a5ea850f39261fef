pub mod doctor;
pub mod ps;
pub mod validate;
