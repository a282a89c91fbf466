//! Parameter domains shared by the form, the validator and the CLI.

/// Largest seed the provider accepts (`u32::MAX`).
pub const SEED_MAX: i64 = 4_294_967_295;

/// Width and height must be multiples of this when a custom size is used.
pub const DIMENSION_MULTIPLE: i64 = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds<T> {
    pub min: T,
    pub max: T,
    pub default: T,
}

pub const STEPS: Bounds<i64> = Bounds {
    min: 1,
    max: 50,
    default: 25,
};

pub const GUIDANCE: Bounds<f64> = Bounds {
    min: 2.0,
    max: 5.0,
    default: 3.0,
};

pub const SAFETY_TOLERANCE: Bounds<i64> = Bounds {
    min: 1,
    max: 5,
    default: 2,
};

pub const INTERVAL: Bounds<f64> = Bounds {
    min: 1.0,
    max: 4.0,
    default: 2.0,
};

pub const WIDTH: Bounds<i64> = Bounds {
    min: 256,
    max: 1440,
    default: 1024,
};

pub const HEIGHT: Bounds<i64> = Bounds {
    min: 256,
    max: 1440,
    default: 1024,
};

pub const OUTPUT_QUALITY: Bounds<i64> = Bounds {
    min: 0,
    max: 100,
    default: 80,
};
