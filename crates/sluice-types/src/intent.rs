//! Named intents per value type.
//!
//! Command intents are imperative (`ACTIVATE_ELEMENT`), event intents are
//! past tense (`ELEMENT_ACTIVATED`). Values must stay below
//! [`Intent::MAX_COUNT`](crate::Intent::MAX_COUNT).

pub mod process_instance {
    use crate::Intent;

    pub const ACTIVATE_ELEMENT: Intent = Intent::new(0);
    pub const COMPLETE_ELEMENT: Intent = Intent::new(1);
    pub const TERMINATE_ELEMENT: Intent = Intent::new(2);
    pub const ELEMENT_ACTIVATING: Intent = Intent::new(3);
    pub const ELEMENT_ACTIVATED: Intent = Intent::new(4);
    pub const ELEMENT_COMPLETING: Intent = Intent::new(5);
    pub const ELEMENT_COMPLETED: Intent = Intent::new(6);
    pub const ELEMENT_TERMINATING: Intent = Intent::new(7);
    pub const ELEMENT_TERMINATED: Intent = Intent::new(8);
}

pub mod job {
    use crate::Intent;

    pub const CREATED: Intent = Intent::new(0);
    pub const COMPLETE: Intent = Intent::new(1);
    pub const COMPLETED: Intent = Intent::new(2);
    pub const FAIL: Intent = Intent::new(3);
    pub const FAILED: Intent = Intent::new(4);
    pub const TIME_OUT: Intent = Intent::new(5);
    pub const TIMED_OUT: Intent = Intent::new(6);
}

pub mod deployment {
    use crate::Intent;

    pub const CREATE: Intent = Intent::new(0);
    pub const CREATED: Intent = Intent::new(1);
}

pub mod message {
    use crate::Intent;

    pub const PUBLISH: Intent = Intent::new(0);
    pub const PUBLISHED: Intent = Intent::new(1);
    pub const EXPIRE: Intent = Intent::new(2);
    pub const EXPIRED: Intent = Intent::new(3);
}

pub mod timer {
    use crate::Intent;

    pub const CREATED: Intent = Intent::new(0);
    pub const TRIGGER: Intent = Intent::new(1);
    pub const TRIGGERED: Intent = Intent::new(2);
    pub const CANCELED: Intent = Intent::new(3);
}

pub mod incident {
    use crate::Intent;

    pub const CREATED: Intent = Intent::new(0);
    pub const RESOLVE: Intent = Intent::new(1);
    pub const RESOLVED: Intent = Intent::new(2);
}

pub mod variable {
    use crate::Intent;

    pub const CREATED: Intent = Intent::new(0);
    pub const UPDATED: Intent = Intent::new(1);
}

pub mod error {
    use crate::Intent;

    /// Written by the stream processor when processing a command failed.
    pub const CREATED: Intent = Intent::new(0);
}
