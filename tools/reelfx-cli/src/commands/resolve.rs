//! Resolve an output viewport.

use reelfx_effect_model::{crop_rect, resolve, AspectRatio};

pub fn run(width: u32, height: u32, aspect: String) -> anyhow::Result<()> {
    let aspect: AspectRatio = aspect.parse()?;
    let (out_w, out_h) = resolve(width, height, aspect.ratio())?;
    let crop = crop_rect(width, height, out_w, out_h);

    println!("Source:   {width}x{height}");
    println!("Aspect:   {aspect}");
    println!("Viewport: {out_w}x{out_h}");
    if !crop.is_full() {
        let [x, y, w, h] = crop.to_array();
        println!("Crop:     x={x:.4} y={y:.4} w={w:.4} h={h:.4} (normalized)");
    }
    Ok(())
}
