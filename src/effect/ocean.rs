//! Animated ocean maps from a statistical wave spectrum.
//!
//! ```text
//!  PhillipsSpectrum ──► frequencies ──► inverse FFT ──► height map
//!    (once, CPU)       (per time step)   (rows, cols)      │
//!                                                          ▼
//!                                                      normal map
//! ```

use std::f32::consts::{FRAC_1_SQRT_2, PI};

use glam::{IVec2, Vec2, Vec4};
use log::{debug, error};

use super::water::WaveMapGenerator;
use crate::device::{Device, RenderTargetDesc, RenderTargetId, StateCategory, TextureDesc, TextureId, Viewport};
use crate::effect_pass::EffectPass;
use crate::error::Result;
use crate::post_process::{FftFilter, FilterPass, PostProcessFilter, draw_fullscreen, fullscreen_desc};
use crate::shader_program::EffectShaderProgram;
use crate::tables::{ParamHandle, ParamValue, RenderContext, TextureKind};

const GRAVITY: f32 = 9.8;

/// XorShift64 with Box-Muller normals. Deterministic for a seed.
#[derive(Clone, Debug)]
struct XorShift(u64);

impl XorShift {
    fn new(seed: u64) -> Self {
        Self(if seed == 0 { 0xDEADBEEF } else { seed })
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn next_f32(&mut self) -> f32 {
        let bits = (self.next_u64() >> 40) as u32;
        bits as f32 * (1.0 / (1u32 << 24) as f32)
    }

    fn next_gaussian_pair(&mut self) -> Vec2 {
        let u1 = self.next_f32().max(1e-10);
        let u2 = self.next_f32();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * PI * u2;
        Vec2::new(r * theta.cos(), r * theta.sin())
    }
}

fn phillips(k_dir: Vec2, wind_dir: Vec2, k: f32, l: f32) -> f32 {
    (-1.0 / (k * l).powi(2)).exp() * k_dir.dot(wind_dir).powi(2) / k.powi(4)
}

/// Initial wave amplitudes `h0(K)` on a `size` x `size` grid of wave vectors,
/// centered on the grid's middle texel.
#[derive(Clone, Debug)]
pub struct PhillipsSpectrum {
    size: u32,
    wind: Vec2,
    surface_size: Vec2,
    coefficients: Vec<Vec4>,
}

impl PhillipsSpectrum {
    pub fn new(size: u32, wind: Vec2, surface_size: Vec2) -> Self {
        Self::seeded(size, wind, surface_size, 0x5EED_0CEA)
    }

    /// Same as [`new`](Self::new) with an explicit random seed.
    pub fn seeded(size: u32, wind: Vec2, surface_size: Vec2, seed: u64) -> Self {
        let mut rng = XorShift::new(seed);
        let half = (size >> 1) as f32;
        let a = 0.4 / surface_size.max_element();
        let l = wind.length_squared() / GRAVITY;
        let wind_dir = wind.normalize_or_zero();

        let mut coefficients = Vec::with_capacity((size * size) as usize);
        for y in 0..size {
            for x in 0..size {
                let ksi = rng.next_gaussian_pair();
                let wave = 2.0 * PI * (Vec2::new(x as f32, y as f32) - half) / surface_size;
                let k = wave.length().max(0.01);
                let amplitude = FRAC_1_SQRT_2 * phillips(wave / k, wind_dir, k, l).sqrt();
                coefficients.push(a * (ksi * amplitude).extend(0.0).extend(0.0));
            }
        }

        Self {
            size,
            wind,
            surface_size,
            coefficients,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn wind(&self) -> Vec2 {
        self.wind
    }

    pub fn surface_size(&self) -> Vec2 {
        self.surface_size
    }

    /// Height scale of the largest waves the wind raises.
    pub fn wave_amplitude(&self) -> f32 {
        self.wind.dot(self.wind) / GRAVITY
    }

    /// Row-major RGBA texels: `(re, im, 0, 0)`.
    pub fn frequencies(&self) -> &[Vec4] {
        &self.coefficients
    }

    pub fn coefficient(&self, x: u32, y: u32) -> Option<Vec4> {
        (x < self.size && y < self.size)
            .then(|| self.coefficients[(y * self.size + x) as usize])
    }
}

#[derive(Clone, Copy, Debug)]
struct OceanTargets {
    frequencies: TextureId,
    fft: RenderTargetId,
    fft_maps: [TextureId; 2],
    normal: TextureId,
    maps: RenderTargetId,
}

/// Height and normal maps animated from a [`PhillipsSpectrum`].
///
/// Maps are regenerated when the [`time`](Self::time) parameter changes, at
/// most once per value. The caller's render target, viewport and states are
/// restored afterwards.
pub struct FftWaves {
    spectrum: PhillipsSpectrum,
    time: ParamHandle,
    sharpness: ParamHandle,
    amplitude: ParamHandle,
    grid_size: ParamHandle,
    surface_size: ParamHandle,
    frequencies_map: ParamHandle,
    fft_map: ParamHandle,
    fft: FftFilter,
    frequencies_pass: FilterPass,
    maps_pass: FilterPass,
    targets: Option<OceanTargets>,
    unavailable: bool,
    generated: Option<u64>,
}

impl FftWaves {
    pub fn new(spectrum: PhillipsSpectrum) -> Self {
        let size = spectrum.size();
        let fft = FftFilter::new(size);
        fft.set_direction(-1);
        fft.set_index_shift(IVec2::splat(-((size / 2) as i32)));
        let texture = || ParamHandle::anonymous(ParamValue::texture_slot(TextureKind::D2), false);

        Self {
            time: ParamHandle::anonymous(0.0f32, false),
            sharpness: ParamHandle::anonymous(1.0f32, false),
            amplitude: ParamHandle::anonymous(spectrum.wave_amplitude(), false),
            grid_size: ParamHandle::anonymous(size as f32, false),
            surface_size: ParamHandle::anonymous(spectrum.surface_size(), false),
            frequencies_map: texture(),
            fft_map: texture(),
            fft,
            frequencies_pass: FilterPass::new(),
            maps_pass: FilterPass::new(),
            targets: None,
            unavailable: false,
            generated: None,
            spectrum,
        }
    }

    pub fn spectrum(&self) -> &PhillipsSpectrum {
        &self.spectrum
    }

    /// Seconds of wave animation. Share the handle to drive it from a clock.
    pub fn time(&self) -> ParamHandle {
        self.time.clone()
    }

    pub fn set_time(&self, seconds: f32) {
        self.time.write_values(seconds);
    }

    /// Scales the slopes baked into the normal map.
    pub fn set_sharpness(&self, sharpness: f32) {
        self.sharpness.write_values(sharpness);
    }

    fn targets(&mut self, device: &mut dyn Device) -> Result<OceanTargets> {
        if let Some(targets) = self.targets {
            return Ok(targets);
        }

        let size = self.spectrum.size();
        debug!("Creating {size}x{size} ocean maps");
        let frequencies = device.create_texture(&TextureDesc::float(size, size));
        device.update_texture(frequencies, bytemuck::cast_slice(self.spectrum.frequencies()));

        let fft_maps = [
            device.create_texture(&TextureDesc::float(size, size)),
            device.create_texture(&TextureDesc::float(size, size)),
        ];
        let fft = device.create_render_target(&RenderTargetDesc {
            color: fft_maps.to_vec(),
            depth: None,
        })?;
        let normal = device.create_texture(&TextureDesc::color(size, size));
        let maps = device.create_render_target(&RenderTargetDesc {
            color: vec![normal],
            depth: None,
        })?;

        let targets = OceanTargets {
            frequencies,
            fft,
            fft_maps,
            normal,
            maps,
        };
        self.frequencies_map.set_texture(Some(frequencies));
        self.fft_map.set_texture(Some(fft_maps[0]));
        self.targets = Some(targets);
        Ok(targets)
    }

    fn build_frequencies(&self, device: &mut dyn Device, ctx: &mut RenderContext) -> Result<EffectPass> {
        let program = EffectShaderProgram::new().with_shader("Water/Frequencies.frag");
        let desc = fullscreen_desc(device, ctx, program)?
            .uniform_param("frequenciesMap", Some(self.frequencies_map.clone()))
            .uniform_param("time", Some(self.time.clone()))
            .uniform_param("gridSize", Some(self.grid_size.clone()))
            .uniform_param("surfaceSize", Some(self.surface_size.clone()));
        Ok(EffectPass::new(device, ctx, desc))
    }

    fn build_maps(&self, device: &mut dyn Device, ctx: &mut RenderContext) -> Result<EffectPass> {
        let program = EffectShaderProgram::new().with_shader("Water/OceanMaps.frag");
        let desc = fullscreen_desc(device, ctx, program)?
            .uniform_param("fftMap", Some(self.fft_map.clone()))
            .uniform_param("gridSize", Some(self.grid_size.clone()))
            .uniform_param("surfaceSize", Some(self.surface_size.clone()))
            .uniform_param("sharpness", Some(self.sharpness.clone()))
            .uniform_param("amplitude", Some(self.amplitude.clone()));
        Ok(EffectPass::new(device, ctx, desc))
    }

    fn render_maps(&self, device: &mut dyn Device, ctx: &mut RenderContext, targets: OceanTargets) -> Result<()> {
        device.bind_render_target(Some(targets.fft))?;
        device.set_draw_buffer(0);
        let frequencies = self
            .frequencies_pass
            .get_or_build("Water/Frequencies.frag", || self.build_frequencies(device, ctx));
        if let Some(pass) = frequencies {
            draw_fullscreen(device, &pass);
            // An even number of flips leaves the result in attachment 0.
            self.fft.perform(device, ctx, Some(targets.fft), 0);
        }

        device.bind_render_target(Some(targets.maps))?;
        device.set_draw_buffer(0);
        if let Some(pass) = self.maps_pass.get_or_build("Water/OceanMaps.frag", || self.build_maps(device, ctx)) {
            draw_fullscreen(device, &pass);
            device.generate_mipmaps(targets.normal);
        }
        Ok(())
    }

    /// Destroys the maps and targets. The next `generate` recreates them.
    pub fn release(&mut self, device: &mut dyn Device) {
        if let Some(targets) = self.targets.take() {
            device.destroy_render_target(targets.fft);
            device.destroy_render_target(targets.maps);
            for texture in [targets.frequencies, targets.fft_maps[0], targets.fft_maps[1], targets.normal] {
                device.destroy_texture(texture);
            }
        }
        self.generated = None;
    }
}

impl WaveMapGenerator for FftWaves {
    fn surface_size(&self) -> Vec2 {
        self.spectrum.surface_size()
    }

    fn generate(&mut self, device: &mut dyn Device, ctx: &mut RenderContext) {
        let version = self.time.peek_version();
        if self.unavailable || self.generated == Some(version) {
            return;
        }

        let targets = match self.targets(device) {
            Ok(targets) => targets,
            Err(err) => {
                error!("Can't create ocean maps: {err}");
                self.unavailable = true;
                return;
            }
        };

        let restore_target = device.current_render_target();
        let restore_viewport = device.current_viewport();
        for category in StateCategory::ALL {
            device.push_state(category);
        }
        let size = self.spectrum.size();
        device.set_viewport(Viewport::new(size, size));

        if let Err(err) = self.render_maps(device, ctx, targets) {
            error!("Can't render ocean maps: {err}");
        }

        for category in StateCategory::ALL {
            device.pop_state(category);
        }
        device.set_viewport(restore_viewport);
        if let Err(err) = device.bind_render_target(restore_target) {
            error!("Can't restore render target after ocean maps: {err}");
        }
        self.generated = Some(version);
    }

    fn height_map(&self) -> Option<TextureId> {
        self.targets.map(|targets| targets.fft_maps[0])
    }

    fn normal_map(&self) -> Option<TextureId> {
        self.targets.map(|targets| targets.normal)
    }
}
