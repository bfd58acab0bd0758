mod harness;

pub use harness::TestHarness;
