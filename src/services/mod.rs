pub(crate) mod console;
pub mod exam_api;
