//! Mock collaborators and fixtures shared by the optionflow test suites.

pub mod fixtures;
mod mocks;

pub use mocks::{
    MockAiExtractor, MockExprEvaluator, MockRemoteResolver, MockSecretResolver, MockTransport,
};
