use super::*;

use crate::comm::communicator::ExchangeTags;
use crate::debug_invariants::DebugInvariants;

#[test]
fn default_tag_base_keeps_the_bands_apart() {
    let tags = ExchangeTags::from_base(DEFAULT_TAG_BASE);
    // export channels stop before the import band starts
    assert!(tags.export.offset(63).as_u16() < tags.import.as_u16());
}

#[test]
fn empty_plan_is_the_default() {
    assert_eq!(GhostPlan::default(), GhostPlan::empty());
    GhostPlan::default()
        .validate_invariants()
        .expect("empty plan is valid");
}
