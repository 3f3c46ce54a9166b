//! Scalar reference kernels
//!
//! NOTE: These mirror the WGSL compute entry points one-to-one and compute one
//! output record per call. The CPU backend runs them directly; the GPU backend
//! only uses them in tests. Motion is confined to the xy plane.

use crate::element::{Body, Element, RopeNode};
use glam::Vec2;

/// Physical constants consumed by the rope kernels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RopeConstants {
    pub dt: f32,
    pub mass: f32,
    pub stiffness: f32,
    pub damping: f32,
    /// Per-node gravitational acceleration
    pub gravity: Vec2,
    /// Natural length of one segment
    pub rest_length: f32,
}

/// Physical constants consumed by the N-body kernels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BodyConstants {
    pub dt: f32,
    pub attraction: f32,
    /// Pairs closer than this do not attract
    pub threshold: f32,
}

fn xy(word: [f32; 4]) -> Vec2 {
    Vec2::new(word[0], word[1])
}

fn with_xy(word: [f32; 4], v: Vec2) -> [f32; 4] {
    [v.x, v.y, word[2], word[3]]
}

fn vector(v: Vec2) -> [f32; 4] {
    [v.x, v.y, 0.0, 0.0]
}

// ─── Rope ───────────────────────────────────────────────────────────────────

/// Spring and damping force exerted on node `i` by node `j`.
///
/// F = (|l| - l0) * k * l̂ - c * (v_i - v_j), with l = p_j - p_i
pub fn spring_force(c: &RopeConstants, p_i: Vec2, v_i: Vec2, p_j: Vec2, v_j: Vec2) -> Vec2 {
    let l = p_j - p_i;
    (l.length() - c.rest_length) * c.stiffness * l.normalize_or_zero() - c.damping * (v_i - v_j)
}

/// Sum of the spring forces from both neighbours of `i`. `state(j)` yields the
/// position and velocity of node `j`.
fn neighbour_force(
    c: &RopeConstants,
    n: usize,
    i: usize,
    state: impl Fn(usize) -> (Vec2, Vec2),
) -> Vec2 {
    let (p, v) = state(i);
    let mut force = Vec2::ZERO;
    if i > 0 {
        let (pj, vj) = state(i - 1);
        force += spring_force(c, p, v, pj, vj);
    }
    if i + 1 < n {
        let (pj, vj) = state(i + 1);
        force += spring_force(c, p, v, pj, vj);
    }
    force
}

fn stored_state(nodes: &[RopeNode]) -> impl Fn(usize) -> (Vec2, Vec2) + '_ {
    move |j| (nodes[j].xy(), nodes[j].velocity_xy())
}

fn derived_state<'a>(
    prev: &'a [RopeNode],
    cur: &'a [RopeNode],
    dt: f32,
) -> impl Fn(usize) -> (Vec2, Vec2) + 'a {
    move |j| (cur[j].xy(), (cur[j].xy() - prev[j].xy()) / dt)
}

/// Total force on node `i` including its weight.
pub fn rope_force(c: &RopeConstants, nodes: &[RopeNode], i: usize) -> Vec2 {
    neighbour_force(c, nodes.len(), i, stored_state(nodes)) + c.mass * c.gravity
}

/// Pinned nodes keep their position and carry no velocity.
fn hold(node: RopeNode) -> RopeNode {
    RopeNode {
        velocity: [0.0; 4],
        ..node
    }
}

/// Modified Euler: advance with the average of the old and new velocity.
pub fn rope_modified_euler(c: &RopeConstants, src: &[RopeNode], i: usize) -> RopeNode {
    let node = src[i];
    if !node.is_free() {
        return hold(node);
    }

    let a = neighbour_force(c, src.len(), i, stored_state(src)) / c.mass + c.gravity;
    let v = node.velocity_xy();
    let v_avg = v + 0.5 * a * c.dt;

    RopeNode {
        position: with_xy(node.position, node.xy() + v_avg * c.dt),
        velocity: vector(v + a * c.dt),
        aux: node.aux,
    }
}

/// Velocity Verlet, first half: new position and half-step velocity from the
/// force stored in `aux`.
pub fn rope_vv_predict(c: &RopeConstants, src: &[RopeNode], i: usize) -> RopeNode {
    let node = src[i];
    if !node.is_free() {
        return hold(node);
    }

    let f = xy(node.aux);
    let v = node.velocity_xy();
    let position = node.xy() + c.dt * v + c.dt * c.dt * f / (2.0 * c.mass);

    RopeNode {
        position: with_xy(node.position, position),
        velocity: vector(v + c.dt * f / (2.0 * c.mass)),
        aux: node.aux,
    }
}

/// Velocity Verlet, second half: force at the predicted positions completes
/// the velocity and is kept for the next predict.
pub fn rope_vv_velocity(c: &RopeConstants, src: &[RopeNode], i: usize) -> RopeNode {
    let node = src[i];
    let f = rope_force(c, src, i);
    if !node.is_free() {
        return RopeNode {
            aux: vector(f),
            ..hold(node)
        };
    }

    RopeNode {
        position: node.position,
        velocity: vector(node.velocity_xy() + c.dt * f / (2.0 * c.mass)),
        aux: vector(f),
    }
}

/// Position Verlet: `p(t+dt) = 2p(t) - p(t-dt) + a dt²`, velocities derived
/// from the two known positions.
pub fn rope_verlet(c: &RopeConstants, prev: &[RopeNode], cur: &[RopeNode], i: usize) -> RopeNode {
    let node = cur[i];
    if !node.is_free() {
        return hold(node);
    }

    let a = neighbour_force(c, cur.len(), i, derived_state(prev, cur, c.dt)) / c.mass + c.gravity;
    let p = node.xy();
    let next = p + (p - prev[i].xy()) + a * c.dt * c.dt;

    RopeNode {
        position: with_xy(node.position, next),
        velocity: vector((next - p) / c.dt),
        aux: node.aux,
    }
}

/// Stores the full current force in `aux`.
pub fn rope_prime_force(c: &RopeConstants, src: &[RopeNode], i: usize) -> RopeNode {
    RopeNode {
        aux: vector(rope_force(c, src, i)),
        ..src[i]
    }
}

/// Previous position implied by the current velocity, `p - v dt`.
pub fn rope_prime_previous(c: &RopeConstants, src: &[RopeNode], i: usize) -> RopeNode {
    let node = src[i];
    if !node.is_free() {
        return hold(node);
    }
    RopeNode {
        position: with_xy(node.position, node.xy() - node.velocity_xy() * c.dt),
        ..node
    }
}

/// Velocity and force recovered from two consecutive positions.
pub fn rope_derive_velocity(
    c: &RopeConstants,
    prev: &[RopeNode],
    cur: &[RopeNode],
    i: usize,
) -> RopeNode {
    let state = derived_state(prev, cur, c.dt);
    let node = cur[i];
    let f = neighbour_force(c, cur.len(), i, &state) + c.mass * c.gravity;
    let velocity = if node.is_free() { state(i).1 } else { Vec2::ZERO };

    RopeNode {
        position: node.position,
        velocity: vector(velocity),
        aux: vector(f),
    }
}

/// Weight of a node at rest: the force a freshly built rope starts velocity
/// Verlet with.
pub fn rope_rest_force(c: &RopeConstants, node: &RopeNode) -> RopeNode {
    let f = if node.is_free() {
        c.mass * c.gravity
    } else {
        Vec2::ZERO
    };
    RopeNode {
        aux: vector(f),
        ..*node
    }
}

/// Position one step back assuming only gravity acted:
/// `p(-dt) = p - v dt + ½ g dt²`
pub fn rope_extrapolate_previous(c: &RopeConstants, node: &RopeNode) -> RopeNode {
    if !node.is_free() {
        return *node;
    }
    let p = node.xy() - node.velocity_xy() * c.dt + 0.5 * c.gravity * c.dt * c.dt;
    RopeNode {
        position: with_xy(node.position, p),
        ..*node
    }
}

// ─── N-body ─────────────────────────────────────────────────────────────────

/// Acceleration of body `i`:
/// a_i = Σ_{j≠i, r≥r_th} G * m_j * d̂ / r
pub fn attraction(
    c: &BodyConstants,
    bodies: &[Body],
    i: usize,
    position: impl Fn(&Body) -> Vec2,
) -> Vec2 {
    let p = position(&bodies[i]);
    let mut a = Vec2::ZERO;
    for (j, other) in bodies.iter().enumerate() {
        if j == i {
            continue;
        }
        let d = position(other) - p;
        let r = d.length();
        if r >= c.threshold && r > 0.0 {
            a += d / r * c.attraction * other.mass / r;
        }
    }
    a
}

fn hold_body(body: Body) -> Body {
    Body {
        position_temp: body.position,
        velocity: [0.0; 4],
        velocity_temp: [0.0; 4],
        ..body
    }
}

/// Copies the state into the running result before a Runge-Kutta step.
pub fn body_rk_prime(src: &[Body], i: usize) -> Body {
    let body = src[i];
    Body {
        position_temp: body.position,
        velocity_temp: body.velocity,
        ..body
    }
}

/// One Runge-Kutta stage. The slope is evaluated on `cur`; the trial state is
/// `org + x1 * dt * slope` and the running result grows by `x2 * dt * slope`.
pub fn body_rk_stage(
    c: &BodyConstants,
    org: &[Body],
    cur: &[Body],
    i: usize,
    x1: f32,
    x2: f32,
) -> Body {
    let base = org[i];
    if !base.is_free() {
        return hold_body(base);
    }

    let a = attraction(c, cur, i, Body::xy);
    let v = cur[i].velocity_xy();

    Body {
        position: with_xy(base.position, base.xy() + x1 * c.dt * v),
        velocity: vector(base.velocity_xy() + x1 * c.dt * a),
        position_temp: with_xy(cur[i].position_temp, cur[i].temp_xy() + x2 * c.dt * v),
        velocity_temp: vector(xy(cur[i].velocity_temp) + x2 * c.dt * a),
        mass: base.mass,
        _padding: [0.0; 3],
    }
}

/// Last Runge-Kutta stage: adds the final slope to the running result and
/// makes it the new state.
pub fn body_rk_finish(c: &BodyConstants, src: &[Body], i: usize, x2: f32) -> Body {
    let body = src[i];
    if !body.is_free() {
        return hold_body(body);
    }

    let a = attraction(c, src, i, Body::xy);
    let p = body.temp_xy() + x2 * c.dt * body.velocity_xy();
    let v = xy(body.velocity_temp) + x2 * c.dt * a;

    Body {
        position: with_xy(body.position, p),
        velocity: vector(v),
        position_temp: with_xy(body.position, p),
        velocity_temp: vector(v),
        mass: body.mass,
        _padding: [0.0; 3],
    }
}

/// Seeds `p(t+h)` and the half-step velocity for velocity Verlet.
pub fn body_vv_prime(c: &BodyConstants, src: &[Body], i: usize) -> Body {
    let body = src[i];
    if !body.is_free() {
        return hold_body(body);
    }

    let a = attraction(c, src, i, Body::xy);
    let v = body.velocity_xy();

    Body {
        position_temp: with_xy(body.position, body.xy() + c.dt * v + 0.5 * c.dt * c.dt * a),
        velocity_temp: vector(v + 0.5 * c.dt * a),
        ..body
    }
}

/// Velocity Verlet step. Forces are evaluated at `p(t+h)`; the body moves
/// there, completes `v(t+h)` and seeds the next half step.
pub fn body_vv(c: &BodyConstants, src: &[Body], i: usize) -> Body {
    let body = src[i];
    if !body.is_free() {
        return hold_body(body);
    }

    let a = attraction(c, src, i, Body::temp_xy);
    let p = body.temp_xy();
    let v = xy(body.velocity_temp) + 0.5 * c.dt * a;

    Body {
        position: with_xy(body.position, p),
        velocity: vector(v),
        position_temp: with_xy(body.position, p + c.dt * v + 0.5 * c.dt * c.dt * a),
        velocity_temp: vector(xy(body.velocity_temp) + c.dt * a),
        mass: body.mass,
        _padding: [0.0; 3],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn rope_constants() -> RopeConstants {
        RopeConstants {
            dt: 1.0 / 60.0,
            mass: 1.0,
            stiffness: 250.0,
            damping: 25.0,
            gravity: Vec2::new(0.0, -0.098),
            rest_length: 0.02,
        }
    }

    fn body_constants() -> BodyConstants {
        BodyConstants {
            dt: 1.0 / 300.0,
            attraction: 0.0002,
            threshold: 0.05,
        }
    }

    fn straight_rope(n: usize, spacing: f32) -> Vec<RopeNode> {
        (0..n)
            .map(|i| {
                let pinned = i == 0 || i == n - 1;
                RopeNode::new(Vec3::new(i as f32 * spacing, 0.0, 0.0), pinned)
            })
            .collect()
    }

    #[test]
    fn spring_at_rest_length_exerts_only_damping() {
        let c = rope_constants();
        let f = spring_force(
            &c,
            Vec2::ZERO,
            Vec2::ZERO,
            Vec2::new(c.rest_length, 0.0),
            Vec2::ZERO,
        );
        assert!(f.length() < 1e-4);
    }

    #[test]
    fn coincident_nodes_do_not_produce_nan() {
        let c = rope_constants();
        let f = spring_force(&c, Vec2::ONE, Vec2::ZERO, Vec2::ONE, Vec2::ZERO);
        assert!(f.is_finite());
    }

    #[test]
    fn pinned_node_keeps_position_under_every_rope_kernel() {
        let c = rope_constants();
        let mut nodes = straight_rope(4, 0.05);
        nodes[0].velocity = [1.0, 1.0, 0.0, 0.0];

        for out in [
            rope_modified_euler(&c, &nodes, 0),
            rope_vv_predict(&c, &nodes, 0),
            rope_vv_velocity(&c, &nodes, 0),
            rope_verlet(&c, &nodes, &nodes, 0),
            rope_prime_previous(&c, &nodes, 0),
        ] {
            assert_eq!(out.position, nodes[0].position);
            assert_eq!(out.velocity, [0.0; 4]);
        }
    }

    #[test]
    fn free_node_at_rest_falls() {
        let c = rope_constants();
        let nodes = straight_rope(3, c.rest_length);
        let out = rope_modified_euler(&c, &nodes, 1);
        assert!(out.xy().y < 0.0);
        assert!(out.velocity_xy().y < 0.0);
        assert_eq!(out.position[3], nodes[1].position[3]);
    }

    #[test]
    fn stretched_spring_pulls_neighbours_together() {
        let c = rope_constants();
        let nodes = straight_rope(3, 2.0 * c.rest_length);
        let f = rope_force(&c, &nodes[..2], 1);
        assert!(f.x < 0.0);
    }

    #[test]
    fn verlet_with_duplicate_history_matches_rest_start() {
        let c = rope_constants();
        let nodes = straight_rope(3, c.rest_length);
        let out = rope_verlet(&c, &nodes, &nodes, 1);
        let expected = nodes[1].xy() + c.gravity * c.dt * c.dt;
        assert!((out.xy() - expected).length() < 1e-6);
    }

    #[test]
    fn derived_velocity_inverts_prime_previous() {
        let c = rope_constants();
        let mut cur = straight_rope(3, c.rest_length);
        cur[1].velocity = [0.5, -0.25, 0.0, 0.0];
        let prev: Vec<_> = (0..3).map(|i| rope_prime_previous(&c, &cur, i)).collect();

        let out = rope_derive_velocity(&c, &prev, &cur, 1);
        assert!((out.velocity_xy() - Vec2::new(0.5, -0.25)).length() < 1e-4);
        assert_eq!(out.position, cur[1].position);
    }

    #[test]
    fn extrapolated_previous_applies_half_gravity_step() {
        let c = rope_constants();
        let nodes = straight_rope(3, c.rest_length);
        let prev = rope_extrapolate_previous(&c, &nodes[1]);
        assert!(prev.xy().y < nodes[1].xy().y);
        assert_eq!(rope_extrapolate_previous(&c, &nodes[0]), nodes[0]);
    }

    #[test]
    fn attraction_ignores_pairs_inside_threshold() {
        let c = body_constants();
        let bodies = [
            Body::new(1.0, Vec2::ZERO, Vec2::ZERO),
            Body::new(10.0, Vec2::new(0.01, 0.0), Vec2::ZERO),
            Body::new(10.0, Vec2::new(-0.5, 0.0), Vec2::ZERO),
        ];
        let a = attraction(&c, &bodies, 0, Body::xy);
        let expected = -c.attraction * 10.0 / 0.5;
        assert!((a.x - expected).abs() < 1e-8);
        assert_eq!(a.y, 0.0);
    }

    #[test]
    fn rk_euler_finish_is_explicit_euler() {
        let c = body_constants();
        let bodies = [
            Body::new(5000.0, Vec2::ZERO, Vec2::ZERO),
            Body::new(1.0, Vec2::new(0.5, 0.0), Vec2::new(0.0, 1.0)),
        ];
        let out = body_rk_finish(&c, &bodies, 1, 1.0);
        let a = attraction(&c, &bodies, 1, Body::xy);

        assert_eq!(out.xy(), Vec2::new(0.5, 0.0) + c.dt * Vec2::new(0.0, 1.0));
        assert_eq!(out.velocity_xy(), Vec2::new(0.0, 1.0) + c.dt * a);
        assert_eq!(out.position, out.position_temp);
        assert_eq!(out.velocity, out.velocity_temp);
    }

    #[test]
    fn vv_step_moves_to_predicted_position() {
        let c = body_constants();
        let bodies = [
            Body::new(5000.0, Vec2::ZERO, Vec2::ZERO),
            Body::new(1.0, Vec2::new(0.5, 0.0), Vec2::new(0.0, 1.0)),
        ];
        let primed: Vec<_> = (0..2).map(|i| body_vv_prime(&c, &bodies, i)).collect();
        let out = body_vv(&c, &primed, 1);
        assert_eq!(out.xy(), primed[1].temp_xy());
        assert!(out.is_free());
    }

    #[test]
    fn pinned_body_holds_through_rk_stage() {
        let c = body_constants();
        let mut bodies = [
            Body::new(5000.0, Vec2::ZERO, Vec2::ZERO),
            Body::new(1.0, Vec2::new(0.5, 0.0), Vec2::new(0.0, 1.0)),
        ];
        bodies[1].set_free(false);
        let out = body_rk_stage(&c, &bodies, &bodies, 1, 0.5, 1.0 / 6.0);
        assert_eq!(out.position, bodies[1].position);
        assert_eq!(out.velocity, [0.0; 4]);
        assert_eq!(out.velocity_temp, [0.0; 4]);
    }
}
