// src/video/mod.rs

pub mod ffmpeg;
pub mod motion;

pub use motion::MotionGate;
