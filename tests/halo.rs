mod util;

use basin_decomp::algs::communicator::Communicator;
use basin_decomp::algs::redistribute::{AvalancheParams, avalanche, scatter_to_neighbors};
use basin_decomp::data::distributed_array::Region;
use basin_decomp::data::patch::{Patch, RowOrientation, push_local_map};
use basin_decomp::partitioning::simple_decompose;
use basin_decomp::topology::terrain::{FlowClass, FlowDirections};
use serial_test::serial;
use util::*;

#[test]
#[serial]
fn one_by_three_ghost_layout() {
    let g = grid(3, 3, 10.0);
    let global: Vec<i32> = (0..9).collect();
    let out = run(3, |comm| {
        let d = simple_decompose(comm, &g)?;
        let p = ghost_patch(comm, &d.layout, &d.partition, &global)?;
        Ok((d.partition.offset_x, p.nx, p.ny, p.ixoff, p.iyoff, p.data().to_vec()))
    });
    // column strips of width 1
    assert_eq!(out[0], (0, 2, 3, 0, 0, vec![0, 1, 3, 4, 6, 7]));
    assert_eq!(out[1], (1, 3, 3, 1, 0, global.clone()));
    assert_eq!(out[2], (2, 2, 3, 1, 0, vec![1, 2, 4, 5, 7, 8]));
}

#[test]
#[serial]
fn ghost_index_matches_global_index() {
    let g = grid(12, 10, 10.0);
    let global: Vec<f32> = (0..g.cells()).map(|i| i as f32).collect();
    run(4, |comm| {
        let d = simple_decompose(comm, &g)?;
        let elev = d.layout.duplicate::<f32, _>(comm, "Elevation")?;
        let p = ghost_patch(comm, &elev, &d.partition, &global)?;
        let part = &d.partition;
        for py in 0..p.ny {
            for px in 0..p.nx {
                let gy = part.offset_y - p.iyoff + py;
                let gx = part.offset_x - p.ixoff + px;
                assert_eq!(p[(py, px)], global[gy * g.nx + gx]);
            }
        }
        Ok(())
    });
}

#[test]
#[serial]
fn push_only_writes_owned_cells() {
    let g = grid(4, 4, 10.0);
    let out = run(2, |comm| {
        let d = simple_decompose(comm, &g)?;
        let array = d.layout.duplicate::<i32, _>(comm, "Owner")?;
        let mut p = Patch::<i32>::allocate(&d.partition, true);
        p.data_mut().fill(comm.rank() as i32 + 1);
        p.push_to_array(&array)?;
        comm.barrier()?;
        array.get(&Region::new(0..4, 0..4))
    });
    assert_eq!(out[0], out[1]);
    let ones = out[0].iter().filter(|&&v| v == 1).count();
    let twos = out[0].iter().filter(|&&v| v == 2).count();
    assert_eq!((ones, twos), (8, 8));
}

#[test]
#[serial]
fn ascending_maps_are_flipped() {
    let g = grid(4, 2, 10.0);
    let out = run(2, |comm| {
        let d = simple_decompose(comm, &g)?;
        let part = &d.partition;
        // reader delivers the southern row first
        let mine: Vec<i32> = (0..part.ny)
            .rev()
            .flat_map(|y| (0..part.nx).map(move |x| ((part.offset_y + y) * 2 + x) as i32))
            .collect();
        push_local_map(&d.layout, part, &mine, RowOrientation::Ascending)?;
        comm.barrier()?;
        d.layout.get(&Region::new(0..4, 0..2))
    });
    assert_eq!(out[0], (0..8).collect::<Vec<i32>>());
    assert_eq!(out[0], out[1]);
}

fn flow_east() -> FlowDirections {
    FlowDirections {
        dir: [0, 255, 0, 0],
        total: 255,
        grad: 1.0,
        class: FlowClass::Gradient,
    }
}

#[test]
#[serial]
fn scatter_crosses_worker_borders() {
    // 1x4 column strips; everything flows east one cell per step
    let g = grid(1, 4, 10.0);
    let deltas = run(4, |comm| {
        let d = simple_decompose(comm, &g)?;
        let scratch = d.layout.duplicate::<f32, _>(comm, "Scratch")?;
        let part = &d.partition;
        let outflow = vec![1.0 + part.offset_x as f32; part.len()];
        let flow = vec![flow_east(); part.len()];
        let mask = vec![1u8; part.len()];
        scatter_to_neighbors(comm, &scratch, &g, part, &mask, &outflow, &flow)
    });
    let flat: Vec<f32> = deltas.into_iter().flatten().collect();
    // the last cell cannot pass its water on
    assert_eq!(flat, vec![-1.0, -1.0, -1.0, 3.0]);
    assert_eq!(flat.iter().sum::<f32>(), 0.0);
}

#[test]
#[serial]
fn avalanche_lands_in_neighbor_partition() {
    let g = grid(1, 2, 10.0);
    let out = run(2, |comm| {
        let d = simple_decompose(comm, &g)?;
        let scratch = d.layout.duplicate::<f32, _>(comm, "Snow Scratch")?;
        let part = &d.partition;
        let mut swq = vec![if part.offset_x == 0 { 1.0 } else { 0.25 }];
        let flow = vec![flow_east()];
        let params = AvalancheParams::new(0.5, 0.01);
        let outcome = avalanche(comm, &scratch, &g, part, &[1], &[1.0], &flow, &mut swq, &params)?;
        Ok((swq, outcome.released))
    });
    assert_eq!(out[0], (vec![0.0], vec![true]));
    // the eastern cell holds less than its holding depth
    assert_eq!(out[1], (vec![1.25], vec![false]));
}
