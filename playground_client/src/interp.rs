//! Interpolation.
//!
//! The server reports discrete positions at its own cadence, with no
//! timestamps attached. The client renders at its own rate and, each
//! frame, moves every entity a fraction of the remaining way toward its
//! latest target. The error decays exponentially and the motion never
//! overshoots; a stationary entity is a fixed point.

use std::time::Duration;

use playground_shared::scene::SceneBackend;

use crate::registry::EntityRegistry;

/// Default fraction of the remaining distance closed per rendered frame.
pub const DEFAULT_ALPHA: f32 = 0.05;

/// How the per-frame blend factor is produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Smoothing {
    /// Fixed fraction per frame. Cheap and simple, but coupled to the
    /// frame rate: the same alpha settles faster at higher Hz.
    PerFrame { alpha: f32 },
    /// Fraction derived from the frame's elapsed time,
    /// `1 - exp(-dt / time_constant)`. Settling speed is independent of
    /// the frame rate.
    TimeScaled { time_constant: Duration },
}

impl Smoothing {
    /// Blend factor for a frame that took `dt`.
    pub fn alpha(self, dt: Duration) -> f32 {
        match self {
            Smoothing::PerFrame { alpha } => alpha,
            Smoothing::TimeScaled { time_constant } => {
                let tau = time_constant.as_secs_f32();
                if tau <= f32::EPSILON {
                    return 1.0;
                }
                1.0 - (-dt.as_secs_f32() / tau).exp()
            }
        }
    }
}

/// Advances every live entity toward its target, once per rendered frame.
pub struct InterpScheduler {
    smoothing: Smoothing,
}

impl Default for InterpScheduler {
    fn default() -> Self {
        Self::per_frame(DEFAULT_ALPHA)
    }
}

impl InterpScheduler {
    /// Fixed per-frame blend factor, clamped to `[0, 1]`. Non-finite
    /// factors fall back to [`DEFAULT_ALPHA`].
    pub fn per_frame(alpha: f32) -> Self {
        Self {
            smoothing: Smoothing::PerFrame {
                alpha: sanitize_alpha(alpha),
            },
        }
    }

    /// Time-scaled smoothing with the given time constant.
    pub fn time_scaled(time_constant: Duration) -> Self {
        Self {
            smoothing: Smoothing::TimeScaled { time_constant },
        }
    }

    pub fn smoothing(&self) -> Smoothing {
        self.smoothing
    }

    pub fn set_smoothing(&mut self, smoothing: Smoothing) {
        self.smoothing = match smoothing {
            Smoothing::PerFrame { alpha } => Smoothing::PerFrame {
                alpha: sanitize_alpha(alpha),
            },
            other => other,
        };
    }

    /// The per-frame pass: blend every entity toward its target and write
    /// the result to its renderable. Infallible; a handle disposed out
    /// from under us is skipped by the scene backend.
    pub fn tick(&self, registry: &mut EntityRegistry, scene: &mut dyn SceneBackend, dt: Duration) {
        let alpha = self.smoothing.alpha(dt);
        for (_, entity) in registry.entities_mut() {
            entity.current = entity.current.lerp(entity.target, alpha);
            scene.set_handle_position(entity.handle, entity.current);
        }
    }
}

/// Blend factors can come in off the console as parsed strings, and
/// `"nan"` parses as a float; lerping by NaN would stick every position
/// at NaN. Non-finite input falls back to the default.
fn sanitize_alpha(alpha: f32) -> f32 {
    if alpha.is_finite() {
        alpha.clamp(0.0, 1.0)
    } else {
        DEFAULT_ALPHA
    }
}
