use approx::assert_relative_eq;
use cirrus::core::lut::{Axis, Lut};

fn plane() -> Lut {
    Lut::from_fn(
        "plane",
        vec![
            Axis::new(vec![0.0, 1.0, 3.0]).expect("Failed to build axis"),
            Axis::linspace(10.0, 5.0, 4).expect("Failed to build axis"),
        ],
        |c| 2.0 * c[0] - 0.5 * c[1] + 1.0,
    )
    .expect("Failed to build table")
}

#[test]
fn test_grid_points_are_reproduced() {
    let lut = plane();
    for &x in &[0.0, 1.0, 3.0] {
        for &y in &[10.0, 15.0, 20.0, 25.0] {
            assert_relative_eq!(lut.interpolate(&[x, y]), 2.0 * x - 0.5 * y + 1.0, epsilon = 1e-12);
        }
    }
    assert_eq!(lut.out_of_range_count(), 0);
}

#[test]
fn test_linear_functions_are_exact_between_samples() {
    let lut = plane();
    assert_relative_eq!(lut.interpolate(&[2.2, 17.5]), 2.0 * 2.2 - 0.5 * 17.5 + 1.0, epsilon = 1e-12);
    assert_relative_eq!(lut.interpolate(&[0.5, 24.0]), 2.0 * 0.5 - 0.5 * 24.0 + 1.0, epsilon = 1e-12);
}

#[test]
fn test_out_of_range_extrapolates_and_counts() {
    let lut = plane();
    // The edge cell extends linearly
    assert_relative_eq!(lut.interpolate(&[4.0, 10.0]), 2.0 * 4.0 - 5.0 + 1.0, epsilon = 1e-12);
    assert_relative_eq!(lut.interpolate(&[0.0, 5.0]), -2.5 + 1.0, epsilon = 1e-12);
    assert_eq!(lut.out_of_range_count(), 2);
    lut.interpolate(&[1.0, 12.0]);
    assert_eq!(lut.out_of_range_count(), 2);
}

#[test]
fn test_vector_table_interpolates_each_component() {
    let axis = Axis::new(vec![0.0, 1.0]).expect("Failed to build axis");
    let lut = Lut::from_vec("vector", vec![axis], 3, vec![0.0, 1.0, 2.0, 10.0, 11.0, 12.0])
        .expect("Failed to build table");
    let mut out = [0.0; 3];
    lut.interpolate_into(&[0.25], &mut out);
    assert_relative_eq!(out[0], 2.5, epsilon = 1e-12);
    assert_relative_eq!(out[1], 3.5, epsilon = 1e-12);
    assert_relative_eq!(out[2], 4.5, epsilon = 1e-12);
}

#[test]
fn test_five_dimensional_corners() {
    let axes: Vec<Axis> = (0..5).map(|_| Axis::linspace(0.0, 1.0, 2).expect("Failed to build axis")).collect();
    let lut = Lut::from_fn("sum", axes, |c| c.iter().sum()).expect("Failed to build table");
    assert_relative_eq!(lut.interpolate(&[1.0, 1.0, 1.0, 1.0, 1.0]), 5.0, epsilon = 1e-12);
    assert_relative_eq!(lut.interpolate(&[0.5, 0.5, 0.5, 0.5, 0.5]), 2.5, epsilon = 1e-12);
    assert_relative_eq!(lut.interpolate(&[1.0, 0.0, 1.0, 0.0, 0.25]), 2.25, epsilon = 1e-12);
}

#[test]
fn test_malformed_tables_are_rejected() {
    assert!(Axis::new(vec![]).is_err());
    assert!(Axis::new(vec![0.0, 2.0, 1.0]).is_err());
    let axis = Axis::linspace(0.0, 1.0, 3).expect("Failed to build axis");
    assert!(Lut::from_vec("short", vec![axis.clone()], 1, vec![1.0, 2.0]).is_err());
    assert!(Lut::from_vec("six", vec![axis; 6], 1, vec![0.0; 729]).is_err());
}
