//! The builtin math library.
//!
//! The starter vocabulary a shading artist expects: degree/radian trig,
//! remapping and blending helpers, a deterministic hash, and vector
//! intrinsics. Registered into the process-wide table on first use; hosts
//! may shadow any of these through their resolver or replace the whole table
//! with their own [`FuncRegistry`](crate::funcs::FuncRegistry).

use std::f64::consts::PI;

use crate::funcs::{FuncDef, FuncRegistry};
use crate::value::Vec3;

// ── degree trig ───────────────────────────────────────────────────────────

fn deg(angle: f64) -> f64 {
    angle * (180.0 / PI)
}

fn rad(angle: f64) -> f64 {
    angle * (PI / 180.0)
}

fn cosd(x: f64) -> f64 {
    rad(x).cos()
}

fn sind(x: f64) -> f64 {
    rad(x).sin()
}

fn tand(x: f64) -> f64 {
    rad(x).tan()
}

fn acosd(x: f64) -> f64 {
    deg(x.acos())
}

fn asind(x: f64) -> f64 {
    deg(x.asin())
}

fn atand(x: f64) -> f64 {
    deg(x.atan())
}

fn atan2d(y: f64, x: f64) -> f64 {
    deg(y.atan2(x))
}

// ── clamping and remapping ────────────────────────────────────────────────

fn clamp(x: f64, lo: f64, hi: f64) -> f64 {
    if x < lo {
        lo
    } else if x > hi {
        hi
    } else {
        x
    }
}

/// 1 - x, the complement blend.
fn invert(x: f64) -> f64 {
    1.0 - x
}

/// Remap [0,1] into [lo,hi].
fn compress(x: f64, lo: f64, hi: f64) -> f64 {
    x * (hi - lo) + lo
}

/// Remap [lo,hi] into [0,1], unclamped; a degenerate range reads as a step.
fn expand(x: f64, lo: f64, hi: f64) -> f64 {
    if lo == hi {
        if x < lo {
            0.0
        } else {
            1.0
        }
    } else {
        (x - lo) / (hi - lo)
    }
}

/// Linear remap of [a1,b1] onto [a2,b2], unclamped.
fn fit(x: f64, a1: f64, b1: f64, a2: f64, b2: f64) -> f64 {
    if a1 == b1 {
        (a2 + b2) / 2.0
    } else {
        (x - a1) / (b1 - a1) * (b2 - a2) + a2
    }
}

fn mix(x: f64, y: f64, alpha: f64) -> f64 {
    x * (1.0 - alpha) + y * alpha
}

fn boxstep(x: f64, a: f64) -> f64 {
    if x < a {
        0.0
    } else {
        1.0
    }
}

fn linearstep(x: f64, a: f64, b: f64) -> f64 {
    if a == b {
        boxstep(x, a)
    } else {
        clamp((x - a) / (b - a), 0.0, 1.0)
    }
}

fn smoothstep(x: f64, a: f64, b: f64) -> f64 {
    let t = linearstep(x, a, b);
    t * t * (3.0 - 2.0 * t)
}

fn gamma_fn(x: f64, g: f64) -> f64 {
    if g == 0.0 {
        0.0
    } else {
        x.powf(1.0 / g)
    }
}

fn bias(x: f64, b: f64) -> f64 {
    if x <= 0.0 || b <= 0.0 {
        0.0
    } else {
        x.powf(b.ln() / 0.5f64.ln())
    }
}

/// Cycle an integer index through the closed range [lo, hi].
fn cycle(index: f64, lo: f64, hi: f64) -> f64 {
    let lo = lo.floor();
    let hi = hi.floor();
    let range = hi - lo + 1.0;
    if range <= 0.0 {
        return lo;
    }
    let offset = index.floor() - lo;
    lo + (offset - (offset / range).floor() * range)
}

// ── variadic scalars ──────────────────────────────────────────────────────

/// Deterministic scrambler of any number of scalars into [0, 1). The same
/// inputs hash to the same value on every sample, which is what makes it
/// usable for stable per-particle randomness.
fn hash(args: &[f64]) -> f64 {
    let mut h: u64 = 0x9e37_79b9_7f4a_7c15;
    for a in args {
        h ^= a.to_bits().wrapping_mul(0x0100_0000_01b3);
        h = h.rotate_left(31).wrapping_mul(0xff51_afd7_ed55_8ccd);
    }
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    (h >> 11) as f64 / (1u64 << 53) as f64
}

/// choose(index, c1, c2, ...): index in [0,1) selects one of the choices.
fn choose(args: &[f64]) -> f64 {
    let choices = &args[1..];
    if choices.is_empty() {
        return 0.0;
    }
    let i = (args[0] * choices.len() as f64).floor();
    let i = clamp(i, 0.0, choices.len() as f64 - 1.0) as usize;
    choices[i]
}

// ── vector intrinsics ─────────────────────────────────────────────────────

fn dist(ax: f64, ay: f64, az: f64, bx: f64, by: f64, bz: f64) -> f64 {
    (Vec3::new(bx, by, bz) - Vec3::new(ax, ay, az)).length()
}

fn angle(a: Vec3, b: Vec3) -> f64 {
    let len = a.length() * b.length();
    if len == 0.0 {
        0.0
    } else {
        clamp(a.dot(b) / len, -1.0, 1.0).acos()
    }
}

fn ortho(a: Vec3, b: Vec3) -> Vec3 {
    a.cross(b).normalized()
}

fn rgb_to_hsl(rgb: Vec3) -> Vec3 {
    let (r, g, b) = (rgb[0], rgb[1], rgb[2]);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.0;
    if max == min {
        return Vec3::new(0.0, 0.0, l);
    }
    let d = max - min;
    let s = if l > 0.5 {
        d / (2.0 - max - min)
    } else {
        d / (max + min)
    };
    let h = if max == r {
        (g - b) / d + if g < b { 6.0 } else { 0.0 }
    } else if max == g {
        (b - r) / d + 2.0
    } else {
        (r - g) / d + 4.0
    } / 6.0;
    Vec3::new(h, s, l)
}

fn hue_to_rgb(p: f64, q: f64, t: f64) -> f64 {
    let t = t - t.floor();
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}

fn hsl_to_rgb(hsl: Vec3) -> Vec3 {
    let (h, s, l) = (hsl[0], hsl[1], hsl[2]);
    if s == 0.0 {
        return Vec3::splat(l);
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    Vec3::new(
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

pub(crate) fn register_all(reg: &mut FuncRegistry) {
    // plain trig and exponentials
    reg.register("sin", FuncDef::func1(f64::sin));
    reg.register("cos", FuncDef::func1(f64::cos));
    reg.register("tan", FuncDef::func1(f64::tan));
    reg.register("asin", FuncDef::func1(f64::asin));
    reg.register("acos", FuncDef::func1(f64::acos));
    reg.register("atan", FuncDef::func1(f64::atan));
    reg.register("atan2", FuncDef::func2(f64::atan2));
    reg.register("sinh", FuncDef::func1(f64::sinh));
    reg.register("cosh", FuncDef::func1(f64::cosh));
    reg.register("tanh", FuncDef::func1(f64::tanh));
    reg.register("exp", FuncDef::func1(f64::exp));
    reg.register("log", FuncDef::func1(f64::ln));
    reg.register("log10", FuncDef::func1(f64::log10));
    reg.register("sqrt", FuncDef::func1(f64::sqrt));
    reg.register("pow", FuncDef::func2(f64::powf));
    reg.register("hypot", FuncDef::func2(f64::hypot));

    // degree variants
    reg.register("deg", FuncDef::func1(deg));
    reg.register("rad", FuncDef::func1(rad));
    reg.register("sind", FuncDef::func1(sind));
    reg.register("cosd", FuncDef::func1(cosd));
    reg.register("tand", FuncDef::func1(tand));
    reg.register("asind", FuncDef::func1(asind));
    reg.register("acosd", FuncDef::func1(acosd));
    reg.register("atand", FuncDef::func1(atand));
    reg.register("atan2d", FuncDef::func2(atan2d));

    // rounding and clamping
    reg.register("abs", FuncDef::func1(f64::abs));
    reg.register("floor", FuncDef::func1(f64::floor));
    reg.register("ceil", FuncDef::func1(f64::ceil));
    reg.register("round", FuncDef::func1(f64::round));
    reg.register("trunc", FuncDef::func1(f64::trunc));
    reg.register("min", FuncDef::func2(f64::min));
    reg.register("max", FuncDef::func2(f64::max));
    reg.register("clamp", FuncDef::func3(clamp));

    // blending and remapping
    reg.register("invert", FuncDef::func1(invert));
    reg.register("compress", FuncDef::func3(compress));
    reg.register("expand", FuncDef::func3(expand));
    reg.register("fit", FuncDef::func5(fit));
    reg.register("mix", FuncDef::func3(mix));
    reg.register("boxstep", FuncDef::func2(boxstep));
    reg.register("linearstep", FuncDef::func3(linearstep));
    reg.register("smoothstep", FuncDef::func3(smoothstep));
    reg.register("gamma", FuncDef::func2(gamma_fn));
    reg.register("bias", FuncDef::func2(bias));
    reg.register("cycle", FuncDef::func3(cycle));

    // variadic
    reg.register("hash", FuncDef::funcn(hash, 1, None));
    reg.register("choose", FuncDef::funcn(choose, 2, None));

    // vectors
    reg.register("length", FuncDef::func1v(Vec3::length));
    reg.register("dist", FuncDef::func6(dist));
    reg.register("dot", FuncDef::func2v(Vec3::dot));
    reg.register("angle", FuncDef::func2v(angle));
    reg.register("cross", FuncDef::func2vv(Vec3::cross));
    reg.register("norm", FuncDef::func1vv(Vec3::normalized));
    reg.register("ortho", FuncDef::func2vv(ortho));
    reg.register("rgbtohsl", FuncDef::func1vv(rgb_to_hsl));
    reg.register("hsltorgb", FuncDef::func1vv(hsl_to_rgb));
}
