//! Declarative authorization policies: data model, loader, and evaluator.

pub mod condition;
pub mod engine;
pub mod loader;
pub mod model;

pub use engine::{evaluate, evaluate_first, EvalContext};
pub use loader::PolicySet;
pub use model::{
    Budget, CredentialRequest, Decision, GrantTo, Policy, PolicyDocument, PolicyEvalResult, Scope,
    Selector,
};
