use iconsketch::search::{nearest, top_k};
use iconsketch::{EmbeddingIndex, IconRecord, RetrievalError};
use ndarray::array;

fn three_icons() -> EmbeddingIndex {
    EmbeddingIndex::new(
        vec![
            IconRecord::new("shapes", "dot.jpg"),
            IconRecord::new("shapes", "square.jpg"),
            IconRecord::new("shapes", "star.jpg"),
        ],
        array![[0.0, 0.0], [1.0, 1.0], [5.0, 5.0]],
    )
    .unwrap()
}

#[test]
fn two_nearest_of_three_never_include_the_far_row() {
    let index = three_icons();
    let found = top_k(&[0.1, 0.1], &index, 2).unwrap();
    assert_eq!(
        found,
        vec![
            IconRecord::new("shapes", "dot.jpg"),
            IconRecord::new("shapes", "square.jpg")
        ]
    );
    let distances: Vec<f32> = nearest(&[0.1, 0.1], &index, 2)
        .unwrap()
        .iter()
        .map(|neighbor| neighbor.distance)
        .collect();
    assert!((distances[0] - 0.1).abs() < 1e-5);
    assert!((distances[1] - 0.9).abs() < 1e-5);
}

#[test]
fn repeated_queries_return_identical_lists() {
    let index = three_icons();
    let first = top_k(&[2.2, 1.9], &index, 3).unwrap();
    for _ in 0..5 {
        assert_eq!(top_k(&[2.2, 1.9], &index, 3).unwrap(), first);
    }
}

#[test]
fn every_row_matches_itself_first() {
    let index = three_icons();
    for row in 0..index.len() {
        let query = index.embedding(row).unwrap().to_vec();
        let found = nearest(&query, &index, 1).unwrap();
        assert_eq!(found[0].row, row);
        assert!(found[0].distance.abs() < f32::EPSILON);
    }
}

#[test]
fn length_is_bounded_by_index_size() {
    let index = three_icons();
    assert!(top_k(&[0.0, 0.0], &index, 0).unwrap().is_empty());
    assert_eq!(top_k(&[0.0, 0.0], &index, 2).unwrap().len(), 2);
    assert_eq!(top_k(&[0.0, 0.0], &index, 50).unwrap().len(), 3);
}

#[test]
fn wrong_query_length_is_rejected() {
    let err = top_k(&[0.0; 256], &three_icons(), 1).unwrap_err();
    assert!(matches!(err, RetrievalError::DimensionMismatch { expected: 2, actual: 256 }));
}
