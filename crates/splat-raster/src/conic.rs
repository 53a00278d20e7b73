//! 2D Gaussian PDF evaluation and its analytic gradients.

use glam::Vec2;

/// A single packed 2D Gaussian: `(uv.x, uv.y, conic.a, conic.b, conic.c, alpha)`.
///
/// `conic` is the symmetric inverse covariance `Σ⁻¹ = [[a, b], [b, c]]`. Callers
/// are responsible for `a > 0` and `a*c - b*b > 0` (positive-definite); this
/// crate does not enforce it; degenerate covariance is not checked.
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Gaussian2D {
    pub uv: [f32; 2],
    pub conic: [f32; 3],
    pub alpha: f32,
}

impl Gaussian2D {
    pub fn new(uv: Vec2, conic: Conic, alpha: f32) -> Self {
        Self {
            uv: uv.into(),
            conic: [conic.a, conic.b, conic.c],
            alpha,
        }
    }

    pub fn uv(&self) -> Vec2 {
        Vec2::from(self.uv)
    }

    pub fn conic(&self) -> Conic {
        Conic {
            a: self.conic[0],
            b: self.conic[1],
            c: self.conic[2],
        }
    }

    /// Read a packed `[N, 6] f32` row-major buffer at Gaussian index `idx`.
    pub fn read(points: &[f32], idx: usize) -> Self {
        let row = &points[idx * 6..idx * 6 + 6];
        Self {
            uv: [row[0], row[1]],
            conic: [row[2], row[3], row[4]],
            alpha: row[5],
        }
    }
}

/// The symmetric 2x2 inverse covariance of a 2D Gaussian, `Σ⁻¹ = [[a, b], [b, c]]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Conic {
    pub a: f32,
    pub b: f32,
    pub c: f32,
}

/// Packed gradient of the PDF w.r.t. the conic, `(d_a, d_b*2, d_c)`, consistent
/// with the symmetric storage `(a, b, c)` of [`Conic`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConicGrad {
    pub d_a: f32,
    pub d_b2: f32,
    pub d_c: f32,
}

/// `exp(-1/2 (x-mu)^T conic (x-mu))`, evaluated at pixel-space point `x`.
///
/// Omits the normalization constant, so the return value is a plain scalar in
/// `[0, 1]` rather than a normalized density.
pub fn conic_pdf(x: Vec2, mu: Vec2, conic: Conic) -> f32 {
    let d = x - mu;
    let quad = conic.a * d.x * d.x + 2.0 * conic.b * d.x * d.y + conic.c * d.y * d.y;
    (-0.5 * quad).exp()
}

/// `conic_pdf` plus its analytic gradient w.r.t. `mu` and the conic.
///
/// Returns `(pdf, dp/dmu, dp/dconic)`.
pub fn conic_pdf_with_grad(x: Vec2, mu: Vec2, conic: Conic) -> (f32, Vec2, ConicGrad) {
    let d = x - mu;
    let quad = conic.a * d.x * d.x + 2.0 * conic.b * d.x * d.y + conic.c * d.y * d.y;
    let p = (-0.5 * quad).exp();

    // dp/dmu = p * conic * d
    let dp_dmu = Vec2::new(
        p * (conic.a * d.x + conic.b * d.y),
        p * (conic.b * d.x + conic.c * d.y),
    );

    // dp/dconic = -1/2 * p * (d d^T), packed (d_a, d_b*2, d_c).
    let dp_dconic = ConicGrad {
        d_a: -0.5 * p * d.x * d.x,
        d_b2: -0.5 * p * (2.0 * d.x * d.y),
        d_c: -0.5 * p * d.y * d.y,
    };

    (p, dp_dmu, dp_dconic)
}

/// Fixed cutoff used by [`radii_from_conic`]; a Gaussian's influence is
/// conservatively bounded to `k` standard deviations.
pub const RADIUS_CUTOFF: f32 = 3.0;

/// Conservative screen-space radius `k * sqrt(lambda_max(Sigma))`, where
/// `Sigma = conic^-1`. Clamped to at least 1 pixel.
///
/// `lambda_max` is derived explicitly from the conic: invert the 2x2 conic to
/// get `Sigma`, then solve the symmetric 2x2 eigenvalue problem in closed form
/// via the trace/determinant quadratic `lambda = tr/2 +- sqrt((tr/2)^2 - det)`.
pub fn radii_from_conic(conic: Conic) -> f32 {
    let det_conic = conic.a * conic.c - conic.b * conic.b;
    if det_conic <= 0.0 || !det_conic.is_finite() {
        // Degenerate covariance: not checked, result is implementation-defined
        // but must not crash. Fall back to the minimum radius.
        return 1.0;
    }

    // Sigma = conic^-1, a symmetric 2x2: [[sc, -sb], [-sb, sa]] / det_conic.
    let inv_det = 1.0 / det_conic;
    let sigma_a = conic.c * inv_det;
    let sigma_b = -conic.b * inv_det;
    let sigma_c = conic.a * inv_det;

    let trace = sigma_a + sigma_c;
    let det_sigma = sigma_a * sigma_c - sigma_b * sigma_b;
    let half_trace = 0.5 * trace;
    let discriminant = (half_trace * half_trace - det_sigma).max(0.0);
    let lambda_max = half_trace + discriminant.sqrt();

    (RADIUS_CUTOFF * lambda_max.max(0.0).sqrt()).max(1.0)
}
