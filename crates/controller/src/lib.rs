//! Kubernetes controller for resource optimizer profiles

pub mod api;
pub mod config;
pub mod k8s;
pub mod reconcile;
