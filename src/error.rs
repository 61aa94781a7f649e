use strum::{Display, EnumString};

/// How a failure should be handled by the loops that observe it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorClass {
    /// Network or storage hiccup. Recovered by queue redelivery.
    Transient,
    /// Missing or broken external resource. Stops the process.
    Configuration,
    /// Malformed job input. Isolated to the job that carried it.
    Data,
    /// Downstream notification failure. Logged only.
    Notification,
}

impl ErrorClass {
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorClass::Configuration)
    }
}

/// Maps a service error onto the failure taxonomy.
pub trait Classify {
    fn class(&self) -> ErrorClass;

    fn is_fatal(&self) -> bool {
        self.class().is_fatal()
    }
}
