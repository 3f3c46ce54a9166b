use super::{Kernel, Pass, Priming, Scheme, Stage, StageRange};
use crate::error::SimResult;
use crate::params::{check_bounds, Bound, ParameterBlock};
use pingpong_physics::{
    rope_aggregate, rope_extrapolate_previous, rope_rest_force, Aggregate, ElementFlags, RopeNode,
};
use std::fmt;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RopeScheme {
    #[default]
    ModifiedEuler,
    VelocityVerlet,
    Verlet,
}

const MODIFIED_EULER: &[Pass] = &[Pass {
    label: "modified euler",
    stages: &[
        Stage::forward(Kernel::RopeModifiedEuler, StageRange::Boundary),
        Stage::forward(Kernel::RopeModifiedEuler, StageRange::Interior),
    ],
    rotate: true,
}];

const VELOCITY_VERLET: &[Pass] = &[
    Pass {
        label: "velocity verlet predict",
        stages: &[Stage::forward(Kernel::RopePredict, StageRange::All)],
        rotate: true,
    },
    Pass {
        label: "velocity verlet velocity",
        stages: &[
            Stage::forward(Kernel::RopeVelocity, StageRange::Boundary),
            Stage::forward(Kernel::RopeVelocity, StageRange::Interior),
        ],
        rotate: true,
    },
];

const VERLET: &[Pass] = &[Pass {
    label: "verlet",
    stages: &[
        Stage::forward(Kernel::RopeVerlet, StageRange::Boundary).slots(-1, 0, 1),
        Stage::forward(Kernel::RopeVerlet, StageRange::Interior).slots(-1, 0, 1),
    ],
    rotate: true,
}];

const PRIME_PREVIOUS: &[Pass] = &[Pass {
    label: "prime previous positions",
    stages: &[Stage::forward(Kernel::RopePrimePrevious, StageRange::All).slots(0, 0, -1)],
    rotate: false,
}];

const DERIVE_VELOCITY: &[Pass] = &[Pass {
    label: "derive velocity",
    stages: &[Stage::forward(Kernel::RopeDeriveVelocity, StageRange::All).slots(-1, 0, 1)],
    rotate: true,
}];

const PRIME_FORCE: &[Pass] = &[Pass {
    label: "prime force",
    stages: &[Stage::forward(Kernel::RopePrimeForce, StageRange::All)],
    rotate: true,
}];

impl Scheme for RopeScheme {
    type Element = RopeNode;

    const MODEL: &'static str = "rope";
    const MIN_ELEMENTS: usize = 2;

    fn all() -> &'static [Self] {
        &[
            RopeScheme::ModifiedEuler,
            RopeScheme::VelocityVerlet,
            RopeScheme::Verlet,
        ]
    }

    fn slots_required(self) -> usize {
        match self {
            RopeScheme::ModifiedEuler | RopeScheme::VelocityVerlet => 2,
            RopeScheme::Verlet => 3,
        }
    }

    fn validate(params: &ParameterBlock) -> SimResult<()> {
        let c = params.rope_constants();
        check_bounds(&[
            ("mass", c.mass, Bound::Positive),
            ("rest_length", c.rest_length, Bound::Positive),
            ("stiffness", c.stiffness, Bound::NonNegative),
            ("damping", c.damping, Bound::NonNegative),
        ])
    }

    fn history_slot(self) -> Option<i8> {
        (self == RopeScheme::Verlet).then_some(-1)
    }

    fn passes(self) -> &'static [Pass] {
        match self {
            RopeScheme::ModifiedEuler => MODIFIED_EULER,
            RopeScheme::VelocityVerlet => VELOCITY_VERLET,
            RopeScheme::Verlet => VERLET,
        }
    }

    fn transition(from: Self, to: Self) -> &'static [Pass] {
        use RopeScheme::*;
        match (from, to) {
            (a, b) if a == b => &[],
            (_, Verlet) => PRIME_PREVIOUS,
            (Verlet, _) => DERIVE_VELOCITY,
            (ModifiedEuler, VelocityVerlet) => PRIME_FORCE,
            // velocity Verlet leaves complete velocities behind
            _ => &[],
        }
    }

    fn prepare(self, params: &ParameterBlock, initial: &[RopeNode]) -> Vec<RopeNode> {
        match self {
            RopeScheme::VelocityVerlet => {
                let c = params.rope_constants();
                initial.iter().map(|node| rope_rest_force(&c, node)).collect()
            }
            _ => initial.to_vec(),
        }
    }

    fn history(
        self,
        priming: Priming,
        params: &ParameterBlock,
        prepared: &[RopeNode],
    ) -> Option<Vec<RopeNode>> {
        if self != RopeScheme::Verlet {
            return None;
        }
        match priming {
            Priming::Extrapolate => {
                let c = params.rope_constants();
                Some(
                    prepared
                        .iter()
                        .map(|node| rope_extrapolate_previous(&c, node))
                        .collect(),
                )
            }
            Priming::Duplicate => {
                log::warn!("verlet history duplicated from initial state; rope starts at rest");
                Some(prepared.to_vec())
            }
        }
    }

    fn initial_flags(n: usize) -> ElementFlags {
        ElementFlags::new(n)
    }

    fn aggregate(params: &ParameterBlock, elements: &[RopeNode]) -> Aggregate {
        rope_aggregate(&params.rope_constants(), elements)
    }
}

impl fmt::Display for RopeScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RopeScheme::ModifiedEuler => "modified Euler",
            RopeScheme::VelocityVerlet => "velocity Verlet",
            RopeScheme::Verlet => "Verlet",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verlet_needs_three_slots() {
        assert_eq!(RopeScheme::Verlet.slots_required(), 3);
        assert_eq!(RopeScheme::VelocityVerlet.slots_required(), 2);
    }

    #[test]
    fn velocity_verlet_runs_two_passes_with_barrier_between() {
        let passes = RopeScheme::VelocityVerlet.passes();
        assert_eq!(passes.len(), 2);
        assert!(passes.iter().all(|p| p.rotate));
    }

    #[test]
    fn switching_into_verlet_primes_previous_slot() {
        let passes = RopeScheme::transition(RopeScheme::ModifiedEuler, RopeScheme::Verlet);
        assert_eq!(passes[0].stages[0].kernel, Kernel::RopePrimePrevious);
        assert_eq!(passes[0].stages[0].dst, -1);
        assert!(!passes[0].rotate);
    }

    #[test]
    fn switching_out_of_verlet_derives_velocity() {
        for to in [RopeScheme::ModifiedEuler, RopeScheme::VelocityVerlet] {
            let passes = RopeScheme::transition(RopeScheme::Verlet, to);
            assert_eq!(passes[0].stages[0].kernel, Kernel::RopeDeriveVelocity);
        }
    }

    #[test]
    fn body_parameters_rejected_for_rope() {
        assert!(RopeScheme::validate(&ParameterBlock::rope_default(10)).is_ok());
        assert!(matches!(
            RopeScheme::validate(&ParameterBlock::nbody_default(10)),
            Err(crate::SimError::OutOfBounds { name: "mass", .. })
        ));
    }

    #[test]
    fn negative_damping_rejected() {
        let params = ParameterBlock::rope_default(10).with_spring(50.0, -0.1);
        assert!(matches!(
            RopeScheme::validate(&params),
            Err(crate::SimError::OutOfBounds { name: "damping", .. })
        ));
    }

    #[test]
    fn history_only_for_verlet() {
        assert_eq!(RopeScheme::Verlet.history_slot(), Some(-1));
        assert_eq!(RopeScheme::VelocityVerlet.history_slot(), None);

        let params = ParameterBlock::rope_default(4);
        let nodes = vec![RopeNode::default(); 4];
        assert!(RopeScheme::ModifiedEuler
            .history(Priming::Extrapolate, &params, &nodes)
            .is_none());
        assert!(RopeScheme::Verlet
            .history(Priming::Duplicate, &params, &nodes)
            .is_some());
    }
}
