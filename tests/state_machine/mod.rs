//! State machine tests: transition table shape and properties of random
//! dispatch/callback histories.
