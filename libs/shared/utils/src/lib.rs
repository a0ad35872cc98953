pub mod dates;
pub mod extractor;
pub mod test_utils;
