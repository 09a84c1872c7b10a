// DAMONBENCH MATRIX TESTS
// SIZE AND SHAPE OF THE FILE-SEARCH CONFIGURATION MATRIX AS THE CLI BUILDS IT.
// PURE-RUST, RUN OFFLINE.

use std::collections::HashSet;

use damonbench::matrix::{
    MatrixInput, OptionValue, BENCHMARK, CGROUP_NAME, CGROUP_SIZE, ITERATION, PASSES,
};
use damonbench::units::{GIB, MIB};
use damonbench::workload::{FileSearch, Workload};

fn search(passes: Vec<u32>, sizes: Vec<u64>) -> FileSearch {
    FileSearch {
        passes,
        cgroup_sizes: sizes,
        ..FileSearch::new("/data/linux")
    }
}

#[test]
fn size_is_product_of_dimensions() {
    for passes in [vec![20], vec![10, 20], vec![1, 5, 20]] {
        for sizes in [vec![GIB], vec![512 * MIB, GIB]] {
            for iterations in 1..=3u32 {
                for default_only in [false, true] {
                    let w = search(passes.clone(), sizes.clone());
                    let configs = w
                        .configs(&MatrixInput::new(iterations, default_only))
                        .unwrap();
                    let variants = if default_only { 1 } else { 2 };
                    assert_eq!(
                        configs.len(),
                        passes.len() * sizes.len() * variants * iterations as usize
                    );
                }
            }
        }
    }
}

#[test]
fn records_are_distinct_with_uniform_keys() {
    let w = search(vec![10, 20], vec![512 * MIB, GIB]);
    let configs = w.configs(&MatrixInput::new(2, false)).unwrap();

    let rendered: HashSet<String> = configs.iter().map(|c| c.to_string()).collect();
    assert_eq!(rendered.len(), configs.len());

    for c in &configs {
        let keys: Vec<&str> = c.keys().collect();
        assert_eq!(keys, vec![PASSES, CGROUP_SIZE, CGROUP_NAME, BENCHMARK, ITERATION]);
        assert_eq!(c.get_str(BENCHMARK).unwrap(), "filesearch");
    }
}

#[test]
fn iteration_varies_fastest() {
    let w = search(vec![20], vec![GIB]);
    let configs = w.configs(&MatrixInput::new(3, true)).unwrap();
    let iterations: Vec<u64> = configs
        .iter()
        .map(|c| c.get_u64(ITERATION).unwrap())
        .collect();
    assert_eq!(iterations, vec![1, 2, 3]);
}

#[test]
fn extra_dimension_sits_before_iteration() {
    let mut input = MatrixInput::new(2, true);
    input.extra.push((
        "threads".to_string(),
        vec![OptionValue::Int(1), OptionValue::Int(4)],
    ));
    let configs = FileSearch::new("/data").configs(&input).unwrap();
    assert_eq!(configs.len(), 4);
    let keys: Vec<&str> = configs[0].keys().collect();
    assert_eq!(keys[keys.len() - 2..], ["threads", ITERATION]);
    assert_eq!(configs[1].get_u64("threads").unwrap(), 1);
    assert_eq!(configs[2].get_u64("threads").unwrap(), 4);
}

#[test]
fn zero_iterations_or_no_sizes_is_an_error() {
    let w = FileSearch::new("/data");
    assert!(w.configs(&MatrixInput::new(0, false)).is_err());
    assert!(search(vec![20], vec![])
        .configs(&MatrixInput::new(1, false))
        .is_err());
}
