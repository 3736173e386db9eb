//! Monte-Carlo estimate of the absorption of scattered photons in the
//! scattering crystal
//!
//! The scatterer is a NaI cylinder seen end-on, i.e. a disk of radius R in the
//! scattering plane. Photons of the beam enter it along the x axis, interact
//! at an exponentially distributed depth, and scatter towards the second
//! detector, whose face of half-width R sits at distance L under the detector
//! angle. A scattered photon counts as absorbed when its own absorption
//! distance is shorter than its path to the crystal surface.

use crate::{
    klein_nishina::compton_energy,
    numeric::{
        functions::{interp, linspace, sqr},
        reals::consts::PI,
        Float, ELECTRON_MASS_KEV,
    },
    random::{RandomGenerator, DEFAULT_SEED},
    resacc::HitCounter,
    scheduling,
};
use prefix_num_ops::real::*;
use serde::{Deserialize, Serialize};

/// Photon energies of the NaI(Tl) attenuation table (MeV)
const TABLE_ENERGIES_MEV: [Float; 12] = [
    0.1, 0.15, 0.2, 0.3, 0.4, 0.5, 0.6, 0.8, 1.0, 1.022, 1.25, 1.5,
];

/// Mass attenuation coefficients of NaI(Tl) (cm²/g)
const TABLE_MASS_ATTENUATION: [Float; 12] = [
    3.819, 1.388, 0.6982, 0.2964, 0.1803, 0.1313, 0.1055, 0.07907, 0.06544, 0.06430, 0.05548,
    0.04980,
];

/// Density of NaI(Tl) (g/cm³)
pub const NAI_DENSITY: Float = 3.67;

/// Linear attenuation coefficient (1/cm) at energy E (keV)
///
/// The tabulated mass attenuation is interpolated linearly and clamped at the
/// ends of the table.
///
pub fn mu(energy_kev: Float, density: Float) -> Float {
    interp(
        energy_kev / 1000.,
        &TABLE_ENERGIES_MEV,
        &TABLE_MASS_ATTENUATION,
    ) * density
}

/// Mean free path (cm) of a photon of energy E (keV)
pub fn mean_free_path(energy_kev: Float, density: Float) -> Float {
    1. / mu(energy_kev, density)
}

/// Positions of the scattering crystal and of the second detector (cm)
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Geometry {
    /// Distance from the scatterer center to the second detector face
    pub distance: Float,

    /// Radius of the scatterer, also the half-width of the detector face
    pub radius: Float,
}
//
impl Geometry {
    /// Range of scattering angles (radians) under which the second detector,
    /// at angle `theta_det`, is seen from depth `x` on the beam axis
    ///
    /// The returned angles lie within π of `theta_det` and are sorted.
    ///
    pub fn detector_limits(&self, x: Float, theta_det: Float) -> (Float, Float) {
        let (sin, cos) = (sin(theta_det), cos(theta_det));
        let (l, r) = (self.distance, self.radius);
        let corners = [
            (cos * l + sin * r, sin * l - cos * r),
            (cos * l - sin * r, sin * l + cos * r),
        ];
        let [a, b] = corners.map(|(cx, cy)| {
            let angle = cy.atan2(cx - x);
            theta_det + wrap_angle(angle - theta_det)
        });
        (a.min(b), a.max(b))
    }

    /// Path length from depth `x` on the beam axis to the crystal surface,
    /// following direction `theta`
    pub fn intersection_distance(&self, x: Float, theta: Float) -> Float {
        let under_root = (sqr(self.radius) - sqr(x) * sqr(sin(theta))).max(0.);
        (-x * cos(theta) + sqrt(under_root)).max(0.)
    }
}
//
impl Default for Geometry {
    fn default() -> Self {
        Self {
            distance: 17.5,
            radius: 2.9,
        }
    }
}

/// Bring an angle into [−π, π]
fn wrap_angle(angle: Float) -> Float {
    angle - 2. * PI * (angle / (2. * PI)).round()
}

/// Settings of the absorption Monte-Carlo
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct AbsorptionConfig {
    /// Setup geometry
    pub geometry: Geometry,

    /// Density of the scatterer (g/cm³)
    pub density: Float,

    /// Energy of the incoming photons (keV)
    pub photon_energy: Float,

    /// Number of incoming photons
    pub photons: usize,

    /// Scattering directions sampled across the detector, per interaction
    pub angles_per_photon: usize,

    /// Incoming photons per Monte-Carlo batch
    pub batch_size: usize,

    /// Seed of the random number generator
    pub seed: u64,
}
//
impl Default for AbsorptionConfig {
    fn default() -> Self {
        Self {
            geometry: Geometry::default(),
            density: NAI_DENSITY,
            photon_energy: ELECTRON_MASS_KEV,
            photons: 10_000,
            angles_per_photon: 50,
            batch_size: 1_000,
            seed: DEFAULT_SEED,
        }
    }
}

/// Probability that a photon scattered towards the detector at `theta_det`
/// (radians) is absorbed before leaving the scatterer
///
/// Interactions deeper than the crystal diameter are discarded. Returns 0 when
/// no photon interacted in the crystal.
///
pub fn absorption_probability(theta_det: Float, config: &AbsorptionConfig) -> Float {
    let geometry = config.geometry;
    let radius = geometry.radius;
    let beam_mfp = mean_free_path(config.photon_energy, config.density);
    let kernel = |num_samples: usize, rng: &mut RandomGenerator| {
        let mut counter = HitCounter::default();
        for _ in 0..num_samples {
            let depth = rng.exponential(beam_mfp);
            if depth >= 2. * radius {
                continue;
            }
            let x = depth - radius;
            let (lo, hi) = geometry.detector_limits(x, theta_det);
            for theta in linspace(lo, hi, config.angles_per_photon) {
                let travel = geometry.intersection_distance(x, theta);
                let scattered = compton_energy(config.photon_energy, theta);
                let absorbed_after = rng.exponential(mean_free_path(scattered, config.density));
                counter.integrate(absorbed_after < travel);
            }
        }
        counter
    };
    scheduling::run_batched(config.photons, config.batch_size, config.seed, kernel).fraction()
}

/// Absorption probability over `n_angles` detector angles spanning 0 to 180
/// degrees, as (angle in degrees, probability) pairs
pub fn absorption_scan(config: &AbsorptionConfig, n_angles: usize) -> Vec<(Float, Float)> {
    linspace(0., 180., n_angles)
        .map(|deg| (deg, absorption_probability(deg.to_radians(), config)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn attenuation_table_lookup() {
        assert_relative_eq!(mu(500., 1.), 0.1313);
        assert_relative_eq!(mean_free_path(1000., NAI_DENSITY), 1. / (0.06544 * 3.67));
        assert_relative_eq!(mu(550., 1.), 0.5 * (0.1313 + 0.1055), max_relative = 1e-12);
        // Clamped outside of the table
        assert_relative_eq!(mu(10., 1.), 3.819);
        assert_relative_eq!(mu(5000., 1.), 0.04980);
    }

    #[test]
    fn paths_to_the_crystal_surface() {
        let g = Geometry::default();
        assert_relative_eq!(g.intersection_distance(0., 1.), 2.9);
        assert_relative_eq!(g.intersection_distance(-1., 0.), 3.9);
        assert_relative_eq!(g.intersection_distance(1., PI), 3.9, epsilon = 1e-12);
        // Grazing directions from the edge have no path left, never a negative one
        assert_eq!(g.intersection_distance(2.9, PI / 2.), 0.);
        assert!(g.intersection_distance(2.9, 0.) >= 0.);
    }

    #[test]
    fn detector_window_is_centered_on_the_detector() {
        let g = Geometry::default();
        let (lo, hi) = g.detector_limits(0., PI / 2.);
        assert_relative_eq!(lo + hi, PI, epsilon = 1e-12);
        assert_relative_eq!(hi - lo, 2. * (2.9_f64).atan2(17.5), epsilon = 1e-12);

        // Backward detector: the window straddles 180° instead of wrapping
        let (lo, hi) = g.detector_limits(0., PI);
        assert!(lo < PI && hi > PI);
        assert!(hi - lo < 0.5);
    }

    #[test]
    fn dense_crystal_absorbs_forward_photons() {
        let config = AbsorptionConfig {
            density: 1000.,
            photons: 500,
            ..Default::default()
        };
        assert!(absorption_probability(0., &config) > 0.99);
    }

    #[test]
    fn absorption_is_a_reproducible_probability() {
        let config = AbsorptionConfig {
            photons: 2000,
            ..Default::default()
        };
        let p = absorption_probability(1., &config);
        assert!(p > 0. && p < 1., "p = {p}");
        assert_eq!(p, absorption_probability(1., &config));

        let scan = absorption_scan(&config, 5);
        assert_eq!(scan.len(), 5);
        assert_eq!(scan[0].0, 0.);
        assert!(scan.iter().all(|&(_, p)| (0. ..=1.).contains(&p)));
    }

    #[test]
    fn nothing_sampled_gives_zero() {
        let config = AbsorptionConfig {
            photons: 0,
            ..Default::default()
        };
        assert_eq!(absorption_probability(0.3, &config), 0.);
    }
}
