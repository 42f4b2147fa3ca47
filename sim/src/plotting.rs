//! Plots of localization runs.
//!
//! Two figures are produced: a snapshot of the particle ensemble with the landmarks and the ground-truth pose for a
//! single step, and the estimate error over the whole run.

use pflocalize::Pose;
use pflocalize::sim::StepResult;
use plotters::prelude::*;
use std::error::Error;
use std::ops::Range;
use std::path::Path;

/// Square plot extent that contains every point with a relative margin on each side.
///
/// Returns `None` when there are no finite points.
pub fn plot_extent(points: &[(f64, f64)], margin: f64) -> Option<(Range<f64>, Range<f64>)> {
    let finite = points.iter().filter(|(x, y)| x.is_finite() && y.is_finite());
    let (mut x_min, mut x_max, mut y_min, mut y_max) = (
        f64::INFINITY,
        f64::NEG_INFINITY,
        f64::INFINITY,
        f64::NEG_INFINITY,
    );
    for &(x, y) in finite {
        x_min = x_min.min(x);
        x_max = x_max.max(x);
        y_min = y_min.min(y);
        y_max = y_max.max(y);
    }
    if !x_min.is_finite() {
        return None;
    }
    // Equal scale on both axes so headings are not distorted
    let half = 0.5 * (x_max - x_min).max(y_max - y_min).max(1e-3) * (1.0 + 2.0 * margin);
    let (cx, cy) = (0.5 * (x_min + x_max), 0.5 * (y_min + y_max));
    Some(((cx - half)..(cx + half), (cy - half)..(cy + half)))
}

/// Plot the particle ensemble of one step together with the landmarks and the ground-truth pose.
///
/// # Arguments
/// * `particles` - Ensemble at the start of the step
/// * `landmarks` - Landmark positions `[x, y]`
/// * `truth` - Ground-truth pose of the step
/// * `title` - Chart caption
/// * `output_path` - PNG file to write
pub fn plot_ensemble(
    particles: &[Pose],
    landmarks: &[[f64; 2]],
    truth: &Pose,
    title: &str,
    output_path: &Path,
) -> Result<(), Box<dyn Error>> {
    let mut points: Vec<(f64, f64)> = particles.iter().map(|p| (p.x, p.y)).collect();
    points.extend(landmarks.iter().map(|l| (l[0], l[1])));
    points.push((truth.x, truth.y));
    let (x_range, y_range) = plot_extent(&points, 0.05).ok_or("No finite points to plot")?;
    let arrow = 0.04 * (x_range.end - x_range.start);

    let root = BitMapBackend::new(output_path, (800, 800)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 18).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x_range, y_range)?;
    chart
        .configure_mesh()
        .x_desc("x (m)")
        .y_desc("y (m)")
        .draw()?;

    chart
        .draw_series(
            particles
                .iter()
                .map(|p| Circle::new((p.x, p.y), 2, BLUE.mix(0.5).filled())),
        )?
        .label("Particles")
        .legend(|(x, y)| Circle::new((x + 10, y), 3, BLUE.filled()));
    chart
        .draw_series(
            landmarks
                .iter()
                .map(|l| TriangleMarker::new((l[0], l[1]), 8, BLACK.filled())),
        )?
        .label("Landmarks")
        .legend(|(x, y)| TriangleMarker::new((x + 10, y), 6, BLACK.filled()));

    let (sin, cos) = truth.heading.sin_cos();
    chart
        .draw_series(std::iter::once(Circle::new(
            (truth.x, truth.y),
            5,
            RED.filled(),
        )))?
        .label("Ground truth")
        .legend(|(x, y)| Circle::new((x + 10, y), 4, RED.filled()));
    chart.draw_series(LineSeries::new(
        [
            (truth.x, truth.y),
            (truth.x + arrow * cos, truth.y + arrow * sin),
        ],
        RED.stroke_width(2),
    ))?;

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

/// Plot the weighted-estimate and centroid position errors against time.
pub fn plot_errors(results: &[StepResult], output_path: &Path) -> Result<(), Box<dyn Error>> {
    let Some(last) = results.last() else {
        return Err("No data points to plot".into());
    };
    let t0 = results[0].time;
    let max_time = (last.time - t0).max(1e-3);
    let max_error = results
        .iter()
        .flat_map(|r| [r.position_error, r.centroid_error])
        .filter(|e| e.is_finite())
        .fold(0.0f64, f64::max);
    let y_max = (max_error * 1.1).max(1e-3);

    let root = BitMapBackend::new(output_path, (1200, 400)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(
            "Particle filter localization error",
            ("sans-serif", 16).into_font(),
        )
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0..max_time, 0.0..y_max)?;
    chart
        .configure_mesh()
        .x_desc("Time (s)")
        .y_desc("Position error (m)")
        .draw()?;

    chart
        .draw_series(LineSeries::new(
            results.iter().map(|r| (r.time - t0, r.position_error)),
            &RED,
        ))?
        .label("Weighted estimate")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));
    chart
        .draw_series(LineSeries::new(
            results.iter().map(|r| (r.time - t0, r.centroid_error)),
            &BLUE,
        ))?
        .label("Ensemble centroid")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plot_extent_is_square_and_contains_points() {
        let points = [(0.0, 0.0), (2.0, 1.0), (1.0, -0.5)];
        let (x, y) = plot_extent(&points, 0.1).unwrap();
        assert!((x.end - x.start - (y.end - y.start)).abs() < 1e-12);
        for (px, py) in points {
            assert!(x.contains(&px) && y.contains(&py));
        }
    }

    #[test]
    fn test_plot_extent_ignores_non_finite_points() {
        assert!(plot_extent(&[], 0.1).is_none());
        assert!(plot_extent(&[(f64::NAN, 0.0)], 0.1).is_none());
        let (x, _) = plot_extent(&[(1.0, 1.0), (f64::INFINITY, 0.0)], 0.1).unwrap();
        assert!(x.contains(&1.0));
    }
}
