#![allow(dead_code)]

//! Reference kinematics for the integration tests.
//!
//! A deliberately independent forward-kinematics implementation (plain
//! nalgebra isometries, no expression graphs) plus a generator that renders
//! the same chain as a controller document. The expression kernel is correct
//! when both agree.

use nalgebra::{Isometry3, Translation3, Unit, UnitQuaternion, Vector3};

#[derive(Debug, Clone)]
pub struct Link {
    /// Fixed translation from the parent, applied before the joint.
    pub offset: Vector3<f64>,
    /// Joint axis; rotation axis for revolute links, direction of travel for
    /// prismatic ones.
    pub axis: Vector3<f64>,
    pub prismatic: bool,
}

impl Link {
    pub fn revolute(offset: [f64; 3], axis: [f64; 3]) -> Self {
        Link {
            offset: Vector3::from(offset),
            axis: Vector3::from(axis),
            prismatic: false,
        }
    }

    pub fn prismatic(offset: [f64; 3], axis: [f64; 3]) -> Self {
        Link {
            offset: Vector3::from(offset),
            axis: Vector3::from(axis),
            prismatic: true,
        }
    }
}

/// An 8-dof arm shaped like a torso lift plus a 7-dof manipulator: lift,
/// pan/lift/roll shoulder, elbow, roll, wrist flex and roll.
pub fn arm_links() -> Vec<Link> {
    vec![
        Link::prismatic([0.0, 0.0, 0.8], [0.0, 0.0, 1.0]),
        Link::revolute([0.1, 0.0, 0.0], [0.0, 0.0, 1.0]),
        Link::revolute([0.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        Link::revolute([0.0, 0.0, 0.0], [1.0, 0.0, 0.0]),
        Link::revolute([0.4, 0.0, 0.0], [0.0, 1.0, 0.0]),
        Link::revolute([0.0, 0.0, 0.0], [1.0, 0.0, 0.0]),
        Link::revolute([0.321, 0.0, 0.0], [0.0, 1.0, 0.0]),
        Link::revolute([0.0, 0.0, 0.0], [1.0, 0.0, 0.0]),
    ]
}

/// Forward kinematics of the chain at joint positions `q`.
pub fn reference_fk(links: &[Link], q: &[f64]) -> Isometry3<f64> {
    assert_eq!(links.len(), q.len());
    let mut pose = Isometry3::identity();
    for (link, &qi) in links.iter().zip(q) {
        pose *= Translation3::from(link.offset);
        if link.prismatic {
            pose *= Translation3::from(link.axis * qi);
        } else {
            pose *= UnitQuaternion::from_axis_angle(&Unit::new_normalize(link.axis), qi);
        }
    }
    pose
}

fn vector3(v: &Vector3<f64>) -> String {
    format!("{{vector3: [{:?}, {:?}, {:?}]}}", v.x, v.y, v.z)
}

/// Render the chain as a `frame-mul` document; link `i` reads input slot `i`.
pub fn chain_doc(links: &[Link]) -> String {
    let frames: Vec<String> = links
        .iter()
        .enumerate()
        .map(|(i, link)| {
            if link.prismatic {
                format!(
                    "{{frame: [{{quaternion: [0.0, 0.0, 0.0, 1.0]}}, \
                     {{vector-add: [{}, {{scale-vector: [{{input-var: {i}}}, {}]}}]}}]}}",
                    vector3(&link.offset),
                    vector3(&link.axis),
                )
            } else {
                format!(
                    "{{frame: [{{axis-angle: [{}, {{input-var: {i}}}]}}, {}]}}",
                    vector3(&link.axis),
                    vector3(&link.offset),
                )
            }
        })
        .collect();
    format!("{{frame-mul: [{}]}}", frames.join(", "))
}
