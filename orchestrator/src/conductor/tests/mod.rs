mod phase_runner;
mod support;
