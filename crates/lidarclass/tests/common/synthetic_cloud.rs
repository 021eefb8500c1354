use las::{Builder, Color, Point, Write};
use std::path::Path;

const GREY: u16 = 40_000;

fn point(x: f64, y: f64, z: f64, intensity: u16, rgb: [u16; 3]) -> Point {
    Point {
        x,
        y,
        z,
        intensity,
        color: Some(Color {
            red: rgb[0],
            green: rgb[1],
            blue: rgb[2],
        }),
        ..Default::default()
    }
}

/// A strip of street furniture: ground, road, trees, facades and poles,
/// interleaved so every chunk boundary cuts through mixed classes.
pub fn street_scene(n: usize) -> Vec<Point> {
    (0..n)
        .map(|i| {
            let x = 100.0 + i as f64 * 0.25;
            let y = 200.0 + (i % 13) as f64 * 0.5;
            match i % 5 {
                0 => point(x, y, 0.0, 20_000, [GREY; 3]),
                1 => point(x, y, 2.0 + (i % 7) as f64, 15_000, [10_000, 42_000, 9_000]),
                2 => point(x, y, 4.0 + (i % 9) as f64, 30_000, [45_000, 44_000, 46_000]),
                3 => point(x, y, 20.0, 60_000, [20_000, 20_000, 22_000]),
                _ => point(x, y, 0.3, 50_000, [15_000, 15_000, 15_000]),
            }
        })
        .collect()
}

/// Every point at the same elevation.
pub fn flat(n: usize) -> Vec<Point> {
    (0..n)
        .map(|i| point(i as f64, 0.0, 12.5, 30_000, [GREY; 3]))
        .collect()
}

/// Write `points` as a LAS 1.2 point format 2 file (xyz, intensity, rgb).
pub fn write_las(path: &Path, points: &[Point]) -> Result<(), las::Error> {
    let mut builder = Builder::from((1, 2));
    builder.point_format = las::point::Format::new(2)?;
    let header = builder.into_header()?;

    let mut writer = las::Writer::from_path(path, header)?;
    for point in points {
        writer.write(point.clone())?;
    }
    writer.close()?;
    Ok(())
}
