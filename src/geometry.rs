use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Copy)]
pub struct Point2d {
    pub x_coord: f64,
    pub y_coord: f64,
}

impl Point2d {
    pub fn new(x_coord: f64, y_coord: f64) -> Point2d {
        Point2d{x_coord, y_coord}
    }
}


/// Computes the distances between each pair of points, multiplied by
/// `factor` (the beeline-to-network distance ratio).
pub fn euclidean_distances(points: &[Point2d], factor: f64) -> Array<f64, Ix2> {
    let mut points_array1 = Array::zeros((points.len(), 1, 2));
    for (ii, point) in points.iter().enumerate() {
        points_array1[[ii, 0, 0]] = point.x_coord;
        points_array1[[ii, 0, 1]] = point.y_coord;
    }
    let mut points_array2 = points_array1.clone();

    // compute differences between each point on each dimension
    points_array2.swap_axes(0, 1);
    let mut dim_dists: Array<f64, Ix3> = points_array1 - points_array2;

    // compute scaled euclidean distances from dimension differences
    dim_dists.par_mapv_inplace(|xx| xx.powi(2));
    let mut dists_mat = dim_dists.sum_axis(Axis(2));
    dists_mat.par_mapv_inplace(|xx| f64::sqrt(xx) * factor);

    return dists_mat;
}
