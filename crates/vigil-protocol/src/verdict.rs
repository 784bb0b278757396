//! The verdict vocabulary returned by `HttpManager` and serialized back
//! onto the ring by the verdict responder (§3, §4.9).

/// Tagged verdict enum. `Accept`, `Drop`, and `Irrelevant` are terminal for
/// the session; every other variant leaves the session live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Inspect,
    Accept,
    Drop(WebResponseDescriptor),
    Inject(Vec<ModificationDescriptor>),
    Irrelevant,
    Reconf,
    Wait,
}

impl Verdict {
    /// Numeric tag used on the wire (§4.9 reply layout: `verdict:u16`).
    pub fn wire_tag(&self) -> u16 {
        match self {
            Verdict::Inspect => 0,
            Verdict::Accept => 1,
            Verdict::Drop(_) => 2,
            Verdict::Inject(_) => 3,
            Verdict::Irrelevant => 4,
            Verdict::Reconf => 5,
            Verdict::Wait => 6,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Verdict::Accept | Verdict::Drop(_) | Verdict::Irrelevant)
    }
}

/// Kind of byte-precise edit a modification describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModificationType {
    Append,
    Inject,
    Replace,
}

impl ModificationType {
    pub fn wire_tag(self) -> u8 {
        match self {
            ModificationType::Append => 0,
            ModificationType::Inject => 1,
            ModificationType::Replace => 2,
        }
    }
}

/// Sentinel used in place of a real injection position to mean "position is
/// irrelevant" (e.g. a whole-buffer replace).
pub const IRRELEVANT_POSITION: i64 = -1;

/// `(original_buffer_index, injection_pos, mod_type, payload)` from §3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModificationDescriptor {
    pub original_buffer_index: u8,
    pub injection_pos: i64,
    pub mod_type: ModificationType,
    pub is_header: bool,
    pub payload: Vec<u8>,
}

impl ModificationDescriptor {
    pub fn new(
        original_buffer_index: u8,
        injection_pos: i64,
        mod_type: ModificationType,
        is_header: bool,
        payload: Vec<u8>,
    ) -> Self {
        ModificationDescriptor {
            original_buffer_index,
            injection_pos,
            mod_type,
            is_header,
            payload,
        }
    }

    pub fn injection_size(&self) -> u16 {
        self.payload.len() as u16
    }
}

/// The payload of a `Drop` verdict: either a custom page or a redirect.
/// The UUID string is always prefixed by the literal `"Incident Id: "` and
/// carries the session's UUID (§4.9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebResponseDescriptor {
    Custom {
        response_code: u16,
        title: String,
        body: String,
        incident_uuid: String,
    },
    Redirect {
        location: String,
        add_event_id: bool,
        incident_uuid: String,
    },
}

impl WebResponseDescriptor {
    pub fn incident_id_line(uuid: &str) -> String {
        format!("Incident Id: {uuid}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_verdicts() {
        assert!(Verdict::Accept.is_terminal());
        assert!(Verdict::Irrelevant.is_terminal());
        assert!(Verdict::Drop(WebResponseDescriptor::Custom {
            response_code: 403,
            title: "Blocked".into(),
            body: "Go away".into(),
            incident_uuid: "x".into(),
        })
        .is_terminal());
        assert!(!Verdict::Inspect.is_terminal());
        assert!(!Verdict::Wait.is_terminal());
        assert!(!Verdict::Reconf.is_terminal());
    }

    #[test]
    fn incident_id_line_has_literal_prefix() {
        assert_eq!(
            WebResponseDescriptor::incident_id_line("abc-123"),
            "Incident Id: abc-123"
        );
    }
}
