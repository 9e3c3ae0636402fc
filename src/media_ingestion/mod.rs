pub mod upload;
pub mod validation;

pub use upload::handle_diagnosis_upload;
