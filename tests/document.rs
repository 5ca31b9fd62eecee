//! Document round-trip laws over the public API.

use marionette::document::{scope_from_doc, scope_to_doc};
use marionette::{
    ControllableConstraint, ControllerSpec, Error, RotationSpec, ScalarSpec, Scope,
};
use serde_yaml::Value;

fn load(text: &str) -> Value {
    serde_yaml::from_str(text).unwrap()
}

#[test]
fn axis_angle_round_trips_structurally() {
    let doc = load("{axis-angle: [{vector3: [1, 0, 0]}, {input-var: 3}]}");
    let first = RotationSpec::from_doc(&doc).unwrap();
    let emitted = first.to_doc();
    let second = RotationSpec::from_doc(&emitted).unwrap();
    assert_eq!(first, second);
}

#[test]
fn emitted_documents_survive_serialization() {
    let doc = load("{axis-angle: [{vector3: [1, 0, 0]}, {input-var: 3}]}");
    let first = RotationSpec::from_doc(&doc).unwrap();
    let text = serde_yaml::to_string(&first.to_doc()).unwrap();
    let second = RotationSpec::from_doc(&load(&text)).unwrap();
    assert_eq!(first, second);
}

#[test]
fn vector_in_scalar_position_is_rejected() {
    let err = ScalarSpec::from_doc(&load("{double-mul: [-1, {vector3: [1, 2, 3]}]}")).unwrap_err();
    assert!(matches!(err, Error::KindMismatch { .. }));
}

#[test]
fn controllable_constraint_tuple_decodes_exactly() {
    let spec =
        ControllableConstraint::from_doc(&load("controllable-constraint: [-0.1, 0.2, 5.0, 2, my name]"))
            .unwrap();
    assert_eq!(spec.lower, ScalarSpec::Const(-0.1));
    assert_eq!(spec.upper, ScalarSpec::Const(0.2));
    assert_eq!(spec.weight, ScalarSpec::Const(5.0));
    assert_eq!(spec.input_index, 2);
    assert_eq!(spec.name, "my name");
}

#[test]
fn scope_names_survive_the_round_trip() {
    let doc = load(
        "[{axis: {vector3: [0, 0, 1]}}, \
          {turn: {axis-angle: [axis, {input-var: 0}]}}, \
          {hand: {frame: [turn, {vector3: [0.1, 0, 0]}]}}, \
          {height: {z-of: {origin-of: hand}}}]",
    );
    let spec = scope_from_doc(&doc).unwrap();
    let reparsed = scope_from_doc(&scope_to_doc(&spec)).unwrap();
    assert_eq!(spec, reparsed);

    let direct = Scope::from_spec(&spec).unwrap();
    let round_tripped = Scope::from_spec(&reparsed).unwrap();
    let direct_names: Vec<_> = direct.names().collect();
    let round_names: Vec<_> = round_tripped.names().collect();
    assert_eq!(direct_names, round_names);
}

#[test]
fn controller_spec_round_trips_through_its_document() {
    let doc = load(
        "scope: [{goal: 0.25}]\n\
         controllable-constraints: [{controllable-constraint: [-0.1, 0.2, 5.0, 0, joint]}]\n\
         soft-constraints: [{soft-constraint: [goal, goal, 5.0, {input-var: 0}, track]}]\n\
         hard-constraints: [{hard-constraint: [-1.0, 1.0, {input-var: 0}]}]",
    );
    let spec = ControllerSpec::from_doc(&doc).unwrap();
    assert_eq!(ControllerSpec::from_doc(&spec.to_doc()).unwrap(), spec);
}
