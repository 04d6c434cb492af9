//! Planet provisioning and satellite lifecycle tests.
//!
//! Every scenario builds real satellites on loopback listeners and redb files in
//! a temporary directory, then drives them through construction, run, user
//! workflows and teardown.

mod helpers;
mod scenarios;
