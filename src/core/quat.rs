//! Orientation
//!
//! Rotations travel and are stored as unit quaternions. Euler angles only
//! exist at the input edge and are converted with a fixed YXZ order
//! (yaw about Y, then pitch about X, then roll about Z).

use serde::{Serialize, Deserialize};

/// Unit quaternion `{x, y, z, w}`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rotation {
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
    /// Z component
    pub z: f32,
    /// Scalar component
    pub w: f32,
}

impl Default for Rotation {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Rotation {
    /// No rotation.
    pub const IDENTITY: Self = Self { x: 0.0, y: 0.0, z: 0.0, w: 1.0 };

    /// Create a quaternion from raw components (not normalized).
    #[inline]
    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// Convert Euler angles (radians) using YXZ order.
    pub fn from_euler_yxz(angles: EulerAngles) -> Self {
        let (s1, c1) = (angles.pitch * 0.5).sin_cos();
        let (s2, c2) = (angles.yaw * 0.5).sin_cos();
        let (s3, c3) = (angles.roll * 0.5).sin_cos();

        Self::new(
            s1 * c2 * c3 + c1 * s2 * s3,
            c1 * s2 * c3 - s1 * c2 * s3,
            c1 * c2 * s3 - s1 * s2 * c3,
            c1 * c2 * c3 + s1 * s2 * s3,
        )
        .normalized()
    }

    /// Rotation about the Y axis only.
    pub fn from_yaw(yaw: f32) -> Self {
        Self::from_euler_yxz(EulerAngles::new(0.0, yaw, 0.0))
    }

    /// Squared length.
    #[inline]
    pub fn length_squared(self) -> f32 {
        self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w
    }

    /// Unit-length copy with `w >= 0`.
    ///
    /// `q` and `-q` describe the same orientation; picking one sign makes
    /// the conversion idempotent. Degenerate input becomes identity.
    pub fn normalized(self) -> Self {
        let len = self.length_squared().sqrt();
        if !len.is_finite() || len < f32::EPSILON {
            return Self::IDENTITY;
        }
        let sign = if self.w < 0.0 { -1.0 } else { 1.0 };
        let inv = sign / len;
        Self::new(self.x * inv, self.y * inv, self.z * inv, self.w * inv)
    }

    /// True when every component is finite.
    #[inline]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite() && self.w.is_finite()
    }

    /// Angle between two orientations in radians, in [0, PI].
    pub fn angle_to(self, other: Self) -> f32 {
        let a = self.normalized();
        let b = other.normalized();
        let dot = (a.x * b.x + a.y * b.y + a.z * b.z + a.w * b.w).abs().min(1.0);
        2.0 * dot.acos()
    }
}

/// Euler angles in radians, as produced by mouse-look style input.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EulerAngles {
    /// Rotation about X
    pub pitch: f32,
    /// Rotation about Y
    pub yaw: f32,
    /// Rotation about Z
    pub roll: f32,
}

impl EulerAngles {
    /// Create from pitch, yaw, roll.
    pub const fn new(pitch: f32, yaw: f32, roll: f32) -> Self {
        Self { pitch, yaw, roll }
    }

    /// Convert to the transmitted quaternion form.
    pub fn to_rotation(self) -> Rotation {
        Rotation::from_euler_yxz(self)
    }
}

impl From<EulerAngles> for Rotation {
    fn from(angles: EulerAngles) -> Self {
        Rotation::from_euler_yxz(angles)
    }
}
