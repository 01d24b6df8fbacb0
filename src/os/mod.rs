// src/os/mod.rs
//! Thin wrappers over Linux system interfaces.

pub mod epoll;
