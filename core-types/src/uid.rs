// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Deterministic 128-bit identifiers for streams and virtual streams.

use blake3::Hasher;

use crate::types::{ObjectKind, StreamId};

pub const UID_LEN: usize = 16;

struct UidBuilder {
    hasher: Hasher,
}

impl UidBuilder {
    fn new(domain: &[u8]) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(&(domain.len() as u32).to_le_bytes());
        hasher.update(domain);
        Self { hasher }
    }

    fn write_len_prefixed(&mut self, bytes: &[u8]) -> &mut Self {
        self.hasher.update(&(bytes.len() as u32).to_le_bytes());
        self.hasher.update(bytes);
        self
    }

    fn write_u8(&mut self, value: u8) -> &mut Self {
        self.hasher.update(&[value]);
        self
    }

    fn write_u64(&mut self, value: u64) -> &mut Self {
        self.hasher.update(&value.to_le_bytes());
        self
    }

    fn finish(self) -> [u8; UID_LEN] {
        let hash = self.hasher.finalize();
        let mut bytes = [0u8; UID_LEN];
        bytes.copy_from_slice(&hash.as_bytes()[..UID_LEN]);
        bytes
    }
}

fn write_object(builder: &mut UidBuilder, object: &ObjectKind) {
    match object {
        ObjectKind::Node(id) => {
            builder.write_u8(0).write_u64(*id);
        }
        ObjectKind::Location(id) => {
            builder.write_u8(1).write_u64(*id);
        }
    }
}

/// Build the id of the physical stream owned by `object`.
pub fn stream_uid(object: &ObjectKind) -> [u8; UID_LEN] {
    let mut builder = UidBuilder::new(b"stream_uid.v1");
    write_object(&mut builder, object);
    builder.finish()
}

/// Build the id of a virtual stream from its remap object, combinator tag,
/// and ordered member list.
pub fn virtual_stream_uid(
    object: &ObjectKind,
    combinator_tag: u8,
    members: &[StreamId],
) -> [u8; UID_LEN] {
    let mut builder = UidBuilder::new(b"virtual_stream_uid.v1");
    write_object(&mut builder, object);
    builder.write_u8(combinator_tag);
    builder.write_u64(members.len() as u64);
    for member in members {
        builder.write_len_prefixed(member.as_bytes());
    }
    builder.finish()
}
