/*!
# Fleet DevKit - Test harness for the fleet kernel

- Heartbeat payload builder in the wire shape nodes send
- `TestHarness`: a `FleetMonitor` on a manual clock, with helpers to send
  heartbeats, run sweeps and inspect the emitted events
*/

pub mod heartbeat;
pub mod test_utils;

pub use heartbeat::HeartbeatBuilder;
pub use test_utils::TestHarness;
