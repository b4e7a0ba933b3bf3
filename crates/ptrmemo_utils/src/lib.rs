//! Process-level helpers shared by the ptrmemo binaries and tests.

pub mod logger;
