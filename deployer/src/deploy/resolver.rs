//! Old/new container identification after scale-up

use crate::models::container::ContainerObservation;

/// Decide which of the two running containers is the pre-existing one.
///
/// Returns `(old, new)`, or `None` when the input is not exactly two
/// containers or the pair cannot be told apart.
///
/// A tag that matches exactly one image wins. Otherwise (same-tag
/// redeploys) the later `CreatedAt` is the new container; identical
/// timestamps are unresolvable.
pub fn identify<'a>(
    containers: &'a [ContainerObservation],
    target_tag: &str,
) -> Option<(&'a ContainerObservation, &'a ContainerObservation)> {
    let [a, b] = containers else {
        return None;
    };

    match (a.has_tag(target_tag), b.has_tag(target_tag)) {
        (true, false) => return Some((b, a)),
        (false, true) => return Some((a, b)),
        _ => {}
    }

    match a.created_at.cmp(&b.created_at) {
        std::cmp::Ordering::Greater => Some((b, a)),
        std::cmp::Ordering::Less => Some((a, b)),
        std::cmp::Ordering::Equal => None,
    }
}
