//! Peeling of random 3-uniform hypergraphs, shared by the per-bucket solvers.

/// Peels the hypergraph greedily: an edge incident to a vertex of degree 1 is
/// removed and recorded together with that vertex, cascading until no such
/// vertex remains.
///
/// Returns the removal order and the indices of the edges of the 2-core
/// (empty when the whole graph peels). In the order, the vertex of entry `i`
/// is not incident to any edge recorded after `i`, so assignments can be made
/// in reverse order with all other values already fixed.
///
/// Incident edges of a vertex are kept as a xor of their indices with a
/// degree counter, which makes removal O(1) and recovers the only incident
/// edge once the degree drops to 1, following:
/// - D. Belazzougui, P. Boldi, G. Ottaviano, R. Venturini, S. Vigna,
///   "Cache-Oblivious Peeling of Random Hypergraphs", DCC 2014.
pub(crate) fn peel(edges: &[[u32; 3]], num_vertices: usize) -> (Vec<(u32, u32)>, Vec<u32>) {
    let mut degree = vec![0u32; num_vertices];
    let mut incident = vec![0u32; num_vertices];
    for (e, vs) in edges.iter().enumerate() {
        for &v in vs {
            degree[v as usize] += 1;
            incident[v as usize] ^= e as u32;
        }
    }
    let mut alive = vec![true; edges.len()];
    let mut order: Vec<(u32, u32)> = Vec::with_capacity(edges.len());
    let mut try_peel = |v: usize, degree: &mut Vec<u32>, incident: &mut Vec<u32>,
                        alive: &mut Vec<bool>, order: &mut Vec<(u32, u32)>| {
        if degree[v] != 1 { return; }
        let e = incident[v];
        alive[e as usize] = false;
        for &u in &edges[e as usize] {
            degree[u as usize] -= 1;
            incident[u as usize] ^= e;
        }
        order.push((e, v as u32));
    };
    for v in 0..num_vertices {
        try_peel(v, &mut degree, &mut incident, &mut alive, &mut order);
    }
    let mut i = 0;
    while i < order.len() {
        let e = order[i].0 as usize;
        for &u in &edges[e] {
            try_peel(u as usize, &mut degree, &mut incident, &mut alive, &mut order);
        }
        i += 1;
    }
    let core = (0..edges.len() as u32).filter(|&e| alive[e as usize]).collect();
    (order, core)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peels_acyclic_graph_completely() {
        let edges = [[0u32, 3, 6], [1, 3, 7], [2, 4, 6]];
        let (order, core) = peel(&edges, 9);
        assert!(core.is_empty());
        assert_eq!(order.len(), edges.len());
        // every recorded vertex is incident to its edge and to no later edge
        for (i, &(e, v)) in order.iter().enumerate() {
            assert!(edges[e as usize].contains(&v));
            for &(later, _) in &order[i + 1..] {
                assert!(!edges[later as usize].contains(&v));
            }
        }
    }

    #[test]
    fn duplicated_edge_stays_in_core() {
        let edges = [[0u32, 1, 2], [0, 1, 2]];
        let (order, core) = peel(&edges, 3);
        assert!(order.is_empty());
        assert_eq!(core.len(), 2);
    }

    #[test]
    fn partial_peel_leaves_dense_core() {
        // a 2-core on vertices {0,1,2,3} plus a pendant edge that peels
        let edges = [[0u32, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3], [4, 5, 6]];
        let (order, core) = peel(&edges, 7);
        assert_eq!(order.len(), 1);
        assert_eq!(order[0].0, 4);
        assert_eq!(core.len(), 4);
    }
}
