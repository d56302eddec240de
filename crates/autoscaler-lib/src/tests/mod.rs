//! End-to-end scenarios driving the provider facade against the in-memory cloud
