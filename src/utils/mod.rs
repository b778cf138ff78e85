//! Common utilities shared by the experiment binaries and the test suite.
//!
//! - **`problems`**: constructs test operators with a known spectrum (sparse
//!   diagonal matrices, the 1-D Laplacian) and reproducible random vectors.

pub mod problems;
