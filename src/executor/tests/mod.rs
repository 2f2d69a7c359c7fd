mod common;
mod streaming_tests;
