//! Cross-module tests for the application binary.

mod startup_tests;
