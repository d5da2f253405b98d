pub mod error;
pub mod http;
pub mod k8s;
pub mod relay_service;
