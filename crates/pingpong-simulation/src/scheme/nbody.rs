use super::{Kernel, Pass, Scheme, Stage, StageRange};
use crate::error::SimResult;
use crate::params::{check_bounds, Bound, ParameterBlock};
use pingpong_physics::{body_aggregate, Aggregate, Body, ElementFlags};
use std::fmt;

/// Integrators for the N-body scene. The first three share the Runge-Kutta
/// kernels and differ only in their stage coefficients.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BodyScheme {
    Euler,
    Heun,
    RungeKutta4,
    #[default]
    VelocityVerlet,
}

const fn stage(kernel: Kernel) -> Stage {
    Stage::forward(kernel, StageRange::All)
}

const EULER: &[Pass] = &[Pass {
    label: "euler",
    stages: &[stage(Kernel::BodyRkFinish).coefficients(0.0, 1.0)],
    rotate: true,
}];

// Results land back in the current slot, so neither Heun nor RK4 rotates.
const HEUN: &[Pass] = &[
    Pass {
        label: "heun predictor",
        stages: &[stage(Kernel::BodyRkStage).coefficients(1.0, 0.5)],
        rotate: false,
    },
    Pass {
        label: "heun corrector",
        stages: &[stage(Kernel::BodyRkFinish).slots(1, 1, 0).coefficients(0.0, 0.5)],
        rotate: false,
    },
];

const RUNGE_KUTTA_4: &[Pass] = &[
    Pass {
        label: "rk4 k1",
        stages: &[stage(Kernel::BodyRkStage).coefficients(0.5, 1.0 / 6.0)],
        rotate: false,
    },
    Pass {
        label: "rk4 k2",
        stages: &[stage(Kernel::BodyRkStage)
            .slots(0, 1, 2)
            .coefficients(0.5, 1.0 / 3.0)],
        rotate: false,
    },
    Pass {
        label: "rk4 k3",
        stages: &[stage(Kernel::BodyRkStage)
            .slots(0, 2, 1)
            .coefficients(1.0, 1.0 / 3.0)],
        rotate: false,
    },
    Pass {
        label: "rk4 k4",
        stages: &[stage(Kernel::BodyRkFinish)
            .slots(1, 1, 0)
            .coefficients(0.0, 1.0 / 6.0)],
        rotate: false,
    },
];

const VELOCITY_VERLET: &[Pass] = &[Pass {
    label: "velocity verlet",
    stages: &[stage(Kernel::BodyVv)],
    rotate: true,
}];

const VV_PRIME: &[Pass] = &[Pass {
    label: "velocity verlet prime",
    stages: &[stage(Kernel::BodyVvPrime)],
    rotate: true,
}];

const RK_PRIME: &[Pass] = &[Pass {
    label: "runge-kutta prime",
    stages: &[stage(Kernel::BodyRkPrime)],
    rotate: true,
}];

impl Scheme for BodyScheme {
    type Element = Body;

    const MODEL: &'static str = "n-body";
    const MIN_ELEMENTS: usize = 1;

    fn all() -> &'static [Self] {
        &[
            BodyScheme::Euler,
            BodyScheme::Heun,
            BodyScheme::RungeKutta4,
            BodyScheme::VelocityVerlet,
        ]
    }

    fn slots_required(self) -> usize {
        match self {
            BodyScheme::RungeKutta4 => 3,
            _ => 2,
        }
    }

    fn validate(params: &ParameterBlock) -> SimResult<()> {
        let c = params.body_constants();
        check_bounds(&[("threshold", c.threshold, Bound::NonNegative)])
    }

    fn passes(self) -> &'static [Pass] {
        match self {
            BodyScheme::Euler => EULER,
            BodyScheme::Heun => HEUN,
            BodyScheme::RungeKutta4 => RUNGE_KUTTA_4,
            BodyScheme::VelocityVerlet => VELOCITY_VERLET,
        }
    }

    fn transition(from: Self, to: Self) -> &'static [Pass] {
        match (from.is_verlet(), to.is_verlet()) {
            (false, true) => VV_PRIME,
            (true, false) => RK_PRIME,
            _ => &[],
        }
    }

    fn prime_passes(self) -> &'static [Pass] {
        if self.is_verlet() {
            VV_PRIME
        } else {
            &[]
        }
    }

    fn prepare(self, _params: &ParameterBlock, initial: &[Body]) -> Vec<Body> {
        initial
            .iter()
            .map(|b| Body {
                position_temp: b.position,
                velocity_temp: b.velocity,
                ..*b
            })
            .collect()
    }

    fn initial_flags(n: usize) -> ElementFlags {
        ElementFlags::all_free(n)
    }

    fn aggregate(params: &ParameterBlock, elements: &[Body]) -> Aggregate {
        body_aggregate(&params.body_constants(), elements)
    }
}

impl BodyScheme {
    fn is_verlet(self) -> bool {
        self == BodyScheme::VelocityVerlet
    }
}

impl fmt::Display for BodyScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BodyScheme::Euler => "Euler",
            BodyScheme::Heun => "Heun",
            BodyScheme::RungeKutta4 => "Runge-Kutta 4",
            BodyScheme::VelocityVerlet => "velocity Verlet",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_threshold_rejected() {
        let mut params = ParameterBlock::nbody_default(4);
        assert!(BodyScheme::validate(&params).is_ok());
        params.field[3] = -0.01;
        assert!(matches!(
            BodyScheme::validate(&params),
            Err(crate::SimError::OutOfBounds { name: "threshold", .. })
        ));
    }

    #[test]
    fn rk4_weights_sum_to_one() {
        let total: f32 = BodyScheme::RungeKutta4
            .passes()
            .iter()
            .flat_map(|p| p.stages)
            .map(|s| s.coefficients[1])
            .sum();
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn heun_weights_sum_to_one() {
        let total: f32 = BodyScheme::Heun
            .passes()
            .iter()
            .flat_map(|p| p.stages)
            .map(|s| s.coefficients[1])
            .sum();
        assert_eq!(total, 1.0);
    }

    #[test]
    fn only_single_pass_schemes_rotate() {
        assert!(BodyScheme::Euler.passes()[0].rotate);
        assert!(BodyScheme::VelocityVerlet.passes()[0].rotate);
        assert!(BodyScheme::Heun.passes().iter().all(|p| !p.rotate));
        assert!(BodyScheme::RungeKutta4.passes().iter().all(|p| !p.rotate));
    }

    #[test]
    fn runge_kutta_family_switches_need_no_priming() {
        assert!(BodyScheme::transition(BodyScheme::Euler, BodyScheme::RungeKutta4).is_empty());
        assert_eq!(
            BodyScheme::transition(BodyScheme::Heun, BodyScheme::VelocityVerlet),
            VV_PRIME
        );
        assert_eq!(
            BodyScheme::transition(BodyScheme::VelocityVerlet, BodyScheme::Euler),
            RK_PRIME
        );
    }
}
