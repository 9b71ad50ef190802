pub mod run;
pub mod suites;
