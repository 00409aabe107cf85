//! Core library for the panoscan controller.
//!
//! panoscan drives a motorized camera rig to capture a grid of overlapping
//! photographs for later stitching into a panorama. It coordinates two
//! independent devices: a stepper-motor controller speaking line-oriented
//! G-code over a serial link, and a V4L2 camera producing a continuous
//! MJPEG stream. A photograph is taken only once the rig has physically
//! settled at each target position.

pub mod archive;
pub mod camera;
pub mod config;
pub mod error;
pub mod events;
pub mod frames;
pub mod hardware;
pub mod motion;
pub mod scan;
pub mod server;
