// Testing Tools Library
//
// End-to-end scenarios run against a live Mercury deployment:
// - context: endpoints, synthetic users and the shared fixtures
// - scenarios: the checks themselves, grouped into suites
// - output: colored progress and summary printing

pub mod context;
pub mod output;
pub mod scenarios;
