//! Orchestration integration tests.
//!
//! These run the runner, the partitioner and the termination coordinator
//! against in-memory fakes of the cluster, on paused Tokio time:
//! 1. Build a run config and a fake backend
//! 2. Drive the orchestration step under test
//! 3. Check the calls the fake recorded and the files written

mod fakes;
mod partition_scenarios;
mod runner_scenarios;
