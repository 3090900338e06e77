mod common;
mod resilience;
mod wire_scenarios;
