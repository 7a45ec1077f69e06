// Consolidated integration test suite; compiled by `tests/tests.rs`.
mod breakpoints;
mod execution;
mod inspection;
mod supervisor;
mod tools;
