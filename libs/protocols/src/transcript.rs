//! Structured transcript events.
//!
//! Tap points at the protocol choke points emit `tracing` events under
//! the `cicada::transcript` target family. With no subscriber installed
//! the events cost nothing; tests and debugging tools can install a
//! filtered subscriber to capture an execution trace.

/// The tracing target for protocol-level events.
pub const PROTOCOL_TARGET: &str = "cicada::transcript::protocol";

/// The tracing target for field arithmetic events.
pub const MATH_TARGET: &str = "cicada::transcript::math";

/// The tracing target for communicator events.
pub const COMM_TARGET: &str = "cicada::transcript::comm";

/// Records a protocol suite operation boundary.
pub fn protocol(suite: &str, operation: &str, phase: &str) {
    tracing::trace!(target: "cicada::transcript::protocol", suite, operation, phase);
}

/// Records a math operation on suite operands.
pub fn math(operation: &str, detail: &str) {
    tracing::trace!(target: "cicada::transcript::math", operation, detail);
}

/// Records a communicator interaction.
pub fn comm(operation: &str, detail: &str) {
    tracing::trace!(target: "cicada::transcript::comm", operation, detail);
}

#[cfg(test)]
mod test {
    #[test]
    fn events_are_no_ops_without_a_subscriber() {
        // Must not panic or allocate observably.
        super::protocol("additive", "share", "enter");
        super::math("add", "shape=[2]");
        super::comm("send", "dst=1");
    }
}
