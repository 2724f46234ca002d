//! sPMV thermal-comfort model.
//!
//! Computes three empirically calibrated PMV variants plus a predicted
//! clothing-insulation estimate from indoor temperature, indoor relative
//! humidity and outdoor temperature. The coefficient sets are a calibrated
//! fit and must not be altered; results are rounded to two decimals.

use serde::Serialize;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComfortClass {
    Cold,
    Cool,
    Neutral,
    Warm,
    Hot,
}

/// One evaluation of the comfort model.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ComfortReading {
    pub pmv: f64,
    pub pmv2: f64,
    pub pmv3: f64,
    pub clo_pred: f64,
    pub class: ComfortClass,
}

/// Coefficient triples for the three PMV variants of one insulation bracket.
struct Coeffs {
    a: f64,
    b: f64,
    c: f64,
    sa: f64,
    sb: f64,
    sc: f64,
    ba: f64,
    bb: f64,
    bc: f64,
}

/// Compute the sPMV reading for one (T, RH, Tout) triple.
///
/// Inputs are clamped to plausibility ranges (T in [-20, 50] C, RH in
/// [0, 100] %, Tout in [-30, 50] C) so the function never fails on noisy
/// sensor data; it saturates instead.
pub fn compute(indoor_t: f64, indoor_rh: f64, t_out: f64) -> ComfortReading {
    let t = indoor_t.clamp(-20.0, 50.0);
    let rh = indoor_rh.clamp(0.0, 100.0);
    let t_out = t_out.clamp(-30.0, 50.0);

    // Saturation vapor pressure, Magnus-Tetens (kPa), then actual vapor
    // pressure from relative humidity. The b* coefficients expect kPa.
    let es = 0.61094 * ((17.625 * t) / (t + 243.04)).exp();
    let pv = es * (rh / 100.0);

    // Predicted clothing insulation [clo]: cubic in Tout and T, linear in RH.
    let clo_pred = 0.0109 * t_out - 0.0019 * t_out.powi(2) + 0.00004 * t_out.powi(3)
        - 0.2413 * t
        + 0.0078 * t.powi(2)
        - 0.0001 * t.powi(3)
        - 0.0011 * rh
        + 3.5530;

    // Bracket operators are intentionally asymmetric (>=, >=, >, else).
    let coeffs = if clo_pred >= 1.0 {
        Coeffs {
            a: 0.0761,
            b: 0.2769,
            c: -1.7138,
            sa: 0.1077,
            sb: 0.0329,
            sc: -2.4282,
            ba: 0.1478,
            bb: -0.1371,
            bc: 2.5239,
        }
    } else if clo_pred >= 0.8 {
        // 0.8 <= clo_pred < 1.0
        Coeffs {
            a: 0.1253,
            b: 0.1952,
            c: -2.8667,
            sa: 0.1119,
            sb: 0.0406,
            sc: -2.5231,
            ba: 0.1383,
            bb: 0.0269,
            bc: 3.0190,
        }
    } else if clo_pred > 0.5 {
        // 0.5 < clo_pred < 0.8
        Coeffs {
            a: 0.1391,
            b: 0.1207,
            c: -3.3579,
            sa: 0.1121,
            sb: 0.0413,
            sc: -2.5264,
            ba: 0.1383,
            bb: 0.0269,
            bc: 3.0190,
        }
    } else {
        // clo_pred <= 0.5
        Coeffs {
            a: 0.2851,
            b: 0.5619,
            c: -6.2674,
            sa: 0.1121,
            sb: 0.0421,
            sc: -2.5284,
            ba: 0.2803,
            bb: 0.1717,
            bc: 7.1383,
        }
    };

    let pmv = round2(coeffs.a * t + coeffs.b * pv + coeffs.c);
    let pmv2 = round2(coeffs.sa * t + coeffs.sb * pv + coeffs.sc);
    // Third variant carries a sign-flipped constant term.
    let pmv3 = round2(coeffs.ba * t + coeffs.bb * pv - coeffs.bc);

    let class = classify((pmv + pmv2 + pmv3) / 3.0);

    ComfortReading {
        pmv,
        pmv2,
        pmv3,
        clo_pred: round2(clo_pred),
        class,
    }
}

fn classify(pmv: f64) -> ComfortClass {
    if pmv < -1.0 {
        ComfortClass::Cold
    } else if pmv < -0.3 {
        ComfortClass::Cool
    } else if pmv <= 0.3 {
        ComfortClass::Neutral
    } else if pmv <= 1.0 {
        ComfortClass::Warm
    } else {
        ComfortClass::Hot
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
