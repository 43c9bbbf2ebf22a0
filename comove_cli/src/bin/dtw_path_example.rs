//! Prints a worked dynamic-time-warping example as JSON: two sine
//! series, their warp cost, the warp path and the full cost matrix.

use comove_core::array2d::Array2;
use comove_core::metrics::{manhattan_distance_1, Dtw};

fn series_to_string(series: &[f64]) -> String {
    series
        .iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn matrix_to_string(matrix: &Array2<f64>) -> String {
    let mut out = String::new();
    for row in 0..matrix.rows() {
        for column in 0..matrix.columns() {
            if column != 0 {
                out.push(' ');
            }
            out.push_str(&matrix.cell(row, column).to_string());
        }
        out.push('\n');
    }
    out
}

fn main() {
    let mut series_a = Vec::with_capacity(100);
    let mut series_b = Vec::with_capacity(100);
    for i in 0..100 {
        let x = f64::from(i) / 15.0;
        series_a.push(x.sin());
        series_b.push((x * 0.9).sin() + 0.4);
    }

    let mut dtw = Dtw::new(series_a.len(), series_b.len());
    let cost = dtw.run_slices(&series_a, &series_b, manhattan_distance_1);
    let warp_path: Vec<[usize; 2]> = dtw.warp_path().into_iter().map(|(i, j)| [i, j]).collect();

    let report = serde_json::json!({
        "series_a": series_to_string(&series_a),
        "series_b": series_to_string(&series_b),
        "cost": cost,
        "warp_path": warp_path,
        "cost_matrix": matrix_to_string(dtw.cost_matrix()),
    });
    println!("{}", serde_json::to_string_pretty(&report).expect("valid json"));
}
