//! Photo measurements and enhancement filters used by the quality gate.

use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use imageproc::filter::filter3x3;

type GrayF32 = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Luminance channel of an RGB photo.
pub fn luma(image: &RgbImage) -> GrayImage {
    image::imageops::grayscale(image)
}

/// Mean pixel brightness (0.0–255.0). Empty images read as 0.
pub fn mean_brightness(gray: &GrayImage) -> f64 {
    let n = gray.as_raw().len();
    if n == 0 {
        return 0.0;
    }
    gray.as_raw().iter().map(|&p| p as f64).sum::<f64>() / n as f64
}

/// Focus measure: variance of the 4-neighbour Laplacian response.
///
/// Sharp photos have strong second-derivative edges and therefore a high
/// variance; defocused or motion-blurred photos score low.
pub fn focus_measure(gray: &GrayImage) -> f64 {
    const K_LAPLACIAN: [f32; 9] = [0.0, 1.0, 0.0, 1.0, -4.0, 1.0, 0.0, 1.0, 0.0];

    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return 0.0;
    }
    let gray: GrayF32 = ImageBuffer::from_fn(w, h, |x, y| Luma([gray.get_pixel(x, y)[0] as f32]));
    let response: Vec<f32> = filter3x3(&gray, &K_LAPLACIAN).into_raw();

    let n = response.len() as f64;
    let mean = response.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = response.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    var.max(0.0)
}

/// Apply `out = 255 · (in / 255)^(1 / gamma)` to every channel.
///
/// `gamma > 1` brightens shadows.
pub fn gamma_correct(image: &RgbImage, gamma: f64) -> RgbImage {
    let inv = 1.0 / gamma.max(f64::EPSILON);
    let mut lut = [0u8; 256];
    for (i, v) in lut.iter_mut().enumerate() {
        // Truncate, matching a float → u8 cast of the table.
        *v = ((i as f64 / 255.0).powf(inv) * 255.0).clamp(0.0, 255.0) as u8;
    }

    let mut out = image.clone();
    for p in out.pixels_mut() {
        for c in p.0.iter_mut() {
            *c = lut[*c as usize];
        }
    }
    out
}

/// Contrast-Limited Adaptive Histogram Equalization, in place.
///
/// The image is split into a `tiles × tiles` grid (fewer when the image is
/// too small); each tile's histogram is clipped at
/// `clip_limit · tile_pixels / 256`, the excess redistributed evenly, and
/// pixels are mapped by bilinear interpolation between neighbouring tile
/// CDFs.
pub fn clahe(gray: &mut GrayImage, tiles: u32, clip_limit: f32) {
    let (width, height) = gray.dimensions();
    let tx = tiles.min(width).max(1) as usize;
    let ty = tiles.min(height).max(1) as usize;
    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 {
        return;
    }
    let tile_w = w / tx;
    let tile_h = h / ty;
    let tile_pixels = (tile_w * tile_h) as f32;
    let clip = ((clip_limit * tile_pixels / 256.0) as u32).max(1);

    let data = gray.as_raw().clone();
    let mut luts: Vec<[f32; 256]> = Vec::with_capacity(tx * ty);
    for row in 0..ty {
        for col in 0..tx {
            let mut hist = [0u32; 256];
            for y in row * tile_h..(row + 1) * tile_h {
                for &p in &data[y * w + col * tile_w..y * w + (col + 1) * tile_w] {
                    hist[p as usize] += 1;
                }
            }

            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > clip {
                    excess += *bin - clip;
                    *bin = clip;
                }
            }
            let share = excess / 256;
            let remainder = (excess % 256) as usize;
            for (i, bin) in hist.iter_mut().enumerate() {
                *bin += share + u32::from(i < remainder);
            }

            let mut lut = [0f32; 256];
            let mut running = 0u32;
            for (i, &count) in hist.iter().enumerate() {
                running += count;
                lut[i] = running as f32 * 255.0 / tile_pixels;
            }
            luts.push(lut);
        }
    }

    for y in 0..h {
        let fy = ((y as f32 + 0.5) / tile_h as f32 - 0.5).clamp(0.0, (ty - 1) as f32);
        let r0 = fy as usize;
        let r1 = (r0 + 1).min(ty - 1);
        let dy = fy - r0 as f32;
        for x in 0..w {
            let fx = ((x as f32 + 0.5) / tile_w as f32 - 0.5).clamp(0.0, (tx - 1) as f32);
            let c0 = fx as usize;
            let c1 = (c0 + 1).min(tx - 1);
            let dx = fx - c0 as f32;

            let p = data[y * w + x] as usize;
            let top = luts[r0 * tx + c0][p] * (1.0 - dx) + luts[r0 * tx + c1][p] * dx;
            let bottom = luts[r1 * tx + c0][p] * (1.0 - dx) + luts[r1 * tx + c1][p] * dx;
            let value = top * (1.0 - dy) + bottom * dy;
            gray.put_pixel(x as u32, y as u32, Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }
}

/// CLAHE on the luminance (Y of full-range BT.601 YCbCr) of an RGB photo,
/// leaving chroma untouched.
pub fn enhance_contrast(image: &RgbImage, tiles: u32, clip_limit: f32) -> RgbImage {
    let (w, h) = image.dimensions();
    let mut y_plane = GrayImage::new(w, h);
    let mut chroma = Vec::with_capacity((w as usize) * (h as usize));

    for (x, y, p) in image.enumerate_pixels() {
        let (r, g, b) = (p[0] as f32, p[1] as f32, p[2] as f32);
        let luma = 0.299 * r + 0.587 * g + 0.114 * b;
        let cb = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
        let cr = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
        y_plane.put_pixel(x, y, Luma([luma.round().clamp(0.0, 255.0) as u8]));
        chroma.push((cb - 128.0, cr - 128.0));
    }

    clahe(&mut y_plane, tiles, clip_limit);

    let to_u8 = |v: f32| v.round().clamp(0.0, 255.0) as u8;
    let mut out = RgbImage::new(w, h);
    for ((x, y, p), &(cb, cr)) in out.enumerate_pixels_mut().zip(chroma.iter()) {
        let luma = y_plane.get_pixel(x, y)[0] as f32;
        *p = Rgb([
            to_u8(luma + 1.402 * cr),
            to_u8(luma - 0.344_136 * cb - 0.714_136 * cr),
            to_u8(luma + 1.772 * cb),
        ]);
    }
    out
}

/// Sharpen with the fixed 3×3 kernel `[0 -1 0; -1 5 -1; 0 -1 0]`.
pub fn sharpen(image: &RgbImage) -> RgbImage {
    const K_SHARPEN: [f32; 9] = [0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0];
    filter3x3::<_, f32, u8>(image, &K_SHARPEN)
}
