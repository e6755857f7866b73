// Connected component labeling of decoded pixels.
//
// Components are found within each z-plane: two pixels belong to the same
// component when they are adjacent in the plane and were assigned the same
// target. Planes are labeled in parallel, then renumbered so labels are
// unique across the volume.

use clap::ValueEnum;
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use petgraph::unionfind::UnionFind;
use rayon::prelude::*;

use super::classify::UNASSIGNED;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Connectivity {
    // edge neighbors only
    Four,
    // edge and corner neighbors
    Eight,
}

impl Connectivity {
    // Neighbors that precede a pixel in raster order.
    fn preceding_neighbors(&self) -> &'static [(isize, isize)] {
        match self {
            Connectivity::Four => &[(-1, 0), (0, -1)],
            Connectivity::Eight => &[(-1, -1), (-1, 0), (-1, 1), (0, -1)],
        }
    }
}

// Label one plane of targets. Returns labels (0 for unassigned pixels) and
// the number of components. Components are numbered from 1 in raster order
// of their first pixel.
pub fn label_plane(targets: ArrayView2<u32>, connectivity: Connectivity) -> (Array2<u32>, u32) {
    let (ny, nx) = targets.dim();
    let mut uf = UnionFind::<usize>::new(ny * nx);

    for ((y, x), &t) in targets.indexed_iter() {
        if t == UNASSIGNED {
            continue;
        }

        for &(dy, dx) in connectivity.preceding_neighbors() {
            let v = y as isize + dy;
            let u = x as isize + dx;
            if v < 0 || u < 0 || u >= nx as isize {
                continue;
            }
            let (v, u) = (v as usize, u as usize);
            if targets[[v, u]] == t {
                uf.union(y * nx + x, v * nx + u);
            }
        }
    }

    let mut root_labels = vec![0_u32; ny * nx];
    let mut labels = Array2::<u32>::zeros((ny, nx));
    let mut nlabels = 0;
    for ((y, x), &t) in targets.indexed_iter() {
        if t == UNASSIGNED {
            continue;
        }

        let root = uf.find_mut(y * nx + x);
        if root_labels[root] == 0 {
            nlabels += 1;
            root_labels[root] = nlabels;
        }
        labels[[y, x]] = root_labels[root];
    }

    return (labels, nlabels);
}

// Label every z-plane of a volume of targets. Returns the label image and the
// total number of labels. Labels in plane z follow those of plane z - 1.
pub fn label_volume(targets: ArrayView3<u32>, connectivity: Connectivity) -> (Array3<u32>, u32) {
    let planes: Vec<(Array2<u32>, u32)> = targets
        .axis_iter(Axis(0))
        .into_par_iter()
        .map(|plane| label_plane(plane, connectivity))
        .collect();

    let mut labels = Array3::<u32>::zeros(targets.dim());
    let mut offset = 0;
    for (mut out, (plane_labels, nlabels)) in labels.outer_iter_mut().zip(planes) {
        out.zip_mut_with(&plane_labels, |o, &l| {
            if l != 0 {
                *o = l + offset;
            }
        });
        offset += nlabels;
    }

    return (labels, offset);
}
