//! Verdict Responder (§4.9).
//!
//! Serializes a [`Verdict`] into the wire reply layout and hands the
//! resulting segments to [`SharedRing::send_chunked`] as one atomic
//! frame — the responder never partially writes a reply.
//!
//! ```text
//! verdict:u16, session_id:u32, modification_count:u8,
//! [ injection_descriptor | web_response_descriptor ]*
//! ```

use vigil_common::{IntakeResult, SessionId};
use vigil_protocol::{ModificationDescriptor, ModificationType, Verdict, WebResponseDescriptor};

use crate::ring::SharedRing;

/// Builds the reply bytes for `verdict` addressed to `session_id` and
/// writes them as one ring frame.
pub fn respond(ring: &mut SharedRing, session_id: SessionId, verdict: &Verdict) -> IntakeResult<()> {
    let body = encode_body(verdict);
    let mut head = Vec::with_capacity(7);
    head.extend_from_slice(&verdict.wire_tag().to_le_bytes());
    head.extend_from_slice(&session_id.0.to_le_bytes());
    head.push(modification_count(verdict));

    ring.send_chunked(&[&head, &body])
}

fn modification_count(verdict: &Verdict) -> u8 {
    match verdict {
        Verdict::Inject(mods) => mods.len().min(u8::MAX as usize) as u8,
        Verdict::Drop(_) => 1,
        _ => 0,
    }
}

fn encode_body(verdict: &Verdict) -> Vec<u8> {
    match verdict {
        Verdict::Inject(mods) => {
            let mut out = Vec::new();
            for modification in mods {
                out.extend_from_slice(&encode_modification(modification));
            }
            out
        }
        Verdict::Drop(descriptor) => encode_web_response(descriptor),
        Verdict::Accept
        | Verdict::Inspect
        | Verdict::Irrelevant
        | Verdict::Reconf
        | Verdict::Wait => Vec::new(),
    }
}

fn encode_modification(modification: &ModificationDescriptor) -> Vec<u8> {
    let mut out = Vec::with_capacity(13 + modification.payload.len());
    out.push(modification.original_buffer_index);
    out.extend_from_slice(&modification.injection_pos.to_le_bytes());
    out.push(modification.mod_type.wire_tag());
    out.push(modification.is_header as u8);
    out.extend_from_slice(&modification.injection_size().to_le_bytes());
    out.extend_from_slice(&modification.payload);
    out
}

fn encode_web_response(descriptor: &WebResponseDescriptor) -> Vec<u8> {
    match descriptor {
        WebResponseDescriptor::Custom {
            response_code,
            title,
            body,
            incident_uuid,
        } => {
            let mut out = Vec::new();
            out.push(0); // kind tag: custom page
            out.extend_from_slice(&response_code.to_le_bytes());
            out.push(title.len().min(u8::MAX as usize) as u8);
            out.push(body.len().min(u8::MAX as usize) as u8);
            out.extend_from_slice(title.as_bytes());
            out.extend_from_slice(body.as_bytes());
            out.extend_from_slice(WebResponseDescriptor::incident_id_line(incident_uuid).as_bytes());
            out
        }
        WebResponseDescriptor::Redirect {
            location,
            add_event_id,
            incident_uuid,
        } => {
            let mut out = Vec::new();
            out.push(1); // kind tag: redirect
            let location_len = (location.len().min(u16::MAX as usize)) as u16;
            out.extend_from_slice(&location_len.to_le_bytes());
            out.push(*add_event_id as u8);
            out.extend_from_slice(location.as_bytes());
            out.extend_from_slice(WebResponseDescriptor::incident_id_line(incident_uuid).as_bytes());
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::{Received, SharedRing};

    fn scratch_ring() -> (tempfile::TempDir, SharedRing) {
        let dir = tempfile::tempdir().unwrap();
        let ring = SharedRing::init("w1", 1000, 1000, 1, 4, &dir.path().join("ring")).unwrap();
        (dir, ring)
    }

    #[test]
    fn accept_verdict_has_no_body_beyond_header() {
        let (_dir, mut ring) = scratch_ring();
        respond(&mut ring, SessionId(7), &Verdict::Accept).unwrap();

        match ring.receive() {
            Received::Frame { data } => {
                assert_eq!(data.len(), 7);
                assert_eq!(u16::from_le_bytes([data[0], data[1]]), Verdict::Accept.wire_tag());
                assert_eq!(u32::from_le_bytes([data[2], data[3], data[4], data[5]]), 7);
                assert_eq!(data[6], 0);
            }
            _ => panic!("expected a frame"),
        }
    }

    #[test]
    fn drop_verdict_carries_custom_page_and_incident_uuid() {
        let (_dir, mut ring) = scratch_ring();
        let descriptor = WebResponseDescriptor::Custom {
            response_code: 403,
            title: "Blocked".into(),
            body: "Nope".into(),
            incident_uuid: "abc-123".into(),
        };
        respond(&mut ring, SessionId(1), &Verdict::Drop(descriptor)).unwrap();

        match ring.receive() {
            Received::Frame { data } => {
                assert_eq!(data[6], 1); // modification_count for Drop
                let body = &data[7..];
                assert_eq!(body[0], 0); // custom page tag
                let text = String::from_utf8_lossy(body);
                assert!(text.contains("Incident Id: abc-123"));
            }
            _ => panic!("expected a frame"),
        }
    }

    #[test]
    fn inject_verdict_counts_modifications() {
        let (_dir, mut ring) = scratch_ring();
        let mods = vec![
            ModificationDescriptor::new(0, 10, ModificationType::Inject, true, b"X-Foo: 1".to_vec()),
            ModificationDescriptor::new(0, -1, ModificationType::Replace, false, b"body".to_vec()),
        ];
        respond(&mut ring, SessionId(2), &Verdict::Inject(mods)).unwrap();

        match ring.receive() {
            Received::Frame { data } => assert_eq!(data[6], 2),
            _ => panic!("expected a frame"),
        }
    }
}
