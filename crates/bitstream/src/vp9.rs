//! VP9 uncompressed frame header inspection.

/// Whether a VP9 frame is a key frame.
///
/// Reads `frame_marker`, the profile bits, `show_existing_frame` and
/// `frame_type` from the uncompressed header. Superframes carry their
/// first frame at the start, so the same check applies.
pub fn is_vp9_keyframe(frame: &[u8]) -> bool {
    let Some(&first) = frame.first() else {
        return false;
    };
    if first >> 6 != 0b10 {
        return false;
    }
    let profile = ((first >> 5) & 1) | (((first >> 4) & 1) << 1);
    // Profile 3 has a reserved zero bit before show_existing_frame.
    let bit = if profile == 3 { 5 } else { 4 };
    let show_existing_frame = (first >> (7 - bit)) & 1 == 1;
    if show_existing_frame {
        return false;
    }
    let frame_type = (first >> (6 - bit)) & 1;
    frame_type == 0
}

/// `vp09.<profile>.10.08` codec string.
pub fn vp9_codec_string(profile: u8) -> String {
    format!("vp09.{profile:02}.10.08")
}
