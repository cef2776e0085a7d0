use std::collections::BTreeMap;

use crate::core::server::AnnotationSink;
use crate::error::JobError;
use crate::geometry::Polygon;
use crate::models::{AbsPoint, AnnotationGeometry, ImageId, ProjectId, RoiId, TermId, TypeLabel};

/// Fewest contour points that still make a polygon
pub const MIN_POLYGON_POINTS: usize = 3;

/// Annotations collected while one ROI is processed, uploaded in one request
#[derive(Debug, Clone)]
pub struct AnnotationBatch {
    roi: RoiId,
    annotations: Vec<AnnotationGeometry>,
}

impl AnnotationBatch {
    pub fn new(roi: RoiId) -> Self {
        Self {
            roi,
            annotations: Vec::new(),
        }
    }

    pub fn roi(&self) -> RoiId {
        self.roi
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    pub fn annotations(&self) -> &[AnnotationGeometry] {
        &self.annotations
    }

    fn push(&mut self, annotation: AnnotationGeometry) {
        self.annotations.push(annotation);
    }
}

/// Turns remapped contours into annotations of one image
#[derive(Debug, Clone)]
pub struct AnnotationBuilder {
    image: ImageId,
    project: ProjectId,
    cell_term: TermId,
    type_terms: BTreeMap<TypeLabel, TermId>,
}

impl AnnotationBuilder {
    pub fn new(image: ImageId, project: ProjectId, cell_term: TermId) -> Self {
        Self {
            image,
            project,
            cell_term,
            type_terms: BTreeMap::new(),
        }
    }

    /// Extra term per engine type label, added next to the cell term
    pub fn with_type_terms(mut self, type_terms: BTreeMap<TypeLabel, TermId>) -> Self {
        self.type_terms = type_terms;
        self
    }

    pub fn terms_for(&self, label: Option<&TypeLabel>) -> Vec<TermId> {
        let mut terms = vec![self.cell_term];
        if let Some(term) = label.and_then(|l| self.type_terms.get(l)) {
            if *term != self.cell_term {
                terms.push(*term);
            }
        }
        terms
    }

    /// Closed polygon annotation from absolute points; `None` below
    /// [`MIN_POLYGON_POINTS`]. Self-intersections are not checked.
    pub fn build(&self, points: Vec<AbsPoint>, label: Option<&TypeLabel>) -> Option<AnnotationGeometry> {
        if points.len() < MIN_POLYGON_POINTS {
            return None;
        }
        Some(AnnotationGeometry {
            location: Polygon::from_points(points).to_wkt(),
            image: self.image,
            project: self.project,
            terms: self.terms_for(label),
        })
    }

    /// Build and append to `batch`. Returns whether an annotation was added.
    pub fn append(
        &self,
        batch: &mut AnnotationBatch,
        points: Vec<AbsPoint>,
        label: Option<&TypeLabel>,
    ) -> bool {
        match self.build(points, label) {
            Some(annotation) => {
                batch.push(annotation);
                true
            }
            None => false,
        }
    }
}

/// Send a whole batch in one request. The batch is consumed either way;
/// retrying is up to the transport.
pub fn upload_batch(sink: &dyn AnnotationSink, batch: AnnotationBatch) -> Result<usize, JobError> {
    let count = batch.len();
    sink.save_annotations(batch.annotations())
        .map_err(|source| JobError::Upload {
            roi: batch.roi(),
            count,
            source,
        })?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn builder() -> AnnotationBuilder {
        AnnotationBuilder::new(ImageId(5), ProjectId(1), TermId(100))
    }

    fn square() -> Vec<AbsPoint> {
        vec![
            AbsPoint::new(100.0, 250.0),
            AbsPoint::new(110.0, 250.0),
            AbsPoint::new(110.0, 260.0),
            AbsPoint::new(100.0, 260.0),
        ]
    }

    #[test]
    fn builds_closed_polygon_with_metadata() {
        let annotation = builder().build(square(), None).unwrap();
        assert_eq!(
            annotation.location,
            "POLYGON ((100 250, 110 250, 110 260, 100 260, 100 250))"
        );
        assert_eq!(annotation.image, ImageId(5));
        assert_eq!(annotation.project, ProjectId(1));
        assert_eq!(annotation.terms, vec![TermId(100)]);
    }

    #[test]
    fn fewer_than_three_points_build_nothing() {
        let b = builder();
        let mut batch = AnnotationBatch::new(RoiId(9));
        assert!(!b.append(&mut batch, vec![], None));
        assert!(!b.append(&mut batch, square()[..2].to_vec(), None));
        assert!(b.append(&mut batch, square()[..3].to_vec(), None));
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn mapped_type_adds_term() {
        let mut map = BTreeMap::new();
        map.insert(TypeLabel::Name("epithelial".to_string()), TermId(200));
        map.insert(TypeLabel::Index(1), TermId(100));
        let b = builder().with_type_terms(map);

        let epithelial = TypeLabel::Name("epithelial".to_string());
        assert_eq!(b.terms_for(Some(&epithelial)), vec![TermId(100), TermId(200)]);
        // mapping onto the cell term itself does not duplicate it
        assert_eq!(b.terms_for(Some(&TypeLabel::Index(1))), vec![TermId(100)]);
        assert_eq!(b.terms_for(Some(&TypeLabel::Index(2))), vec![TermId(100)]);
    }

    struct Sink {
        calls: RefCell<Vec<usize>>,
        fail: bool,
    }

    impl AnnotationSink for Sink {
        fn save_annotations(&self, annotations: &[AnnotationGeometry]) -> anyhow::Result<()> {
            self.calls.borrow_mut().push(annotations.len());
            if self.fail {
                anyhow::bail!("server said no");
            }
            Ok(())
        }
    }

    #[test]
    fn upload_sends_whole_batch_once() {
        let sink = Sink {
            calls: RefCell::new(Vec::new()),
            fail: false,
        };
        let b = builder();
        let mut batch = AnnotationBatch::new(RoiId(9));
        b.append(&mut batch, square(), None);
        b.append(&mut batch, square(), None);

        assert_eq!(upload_batch(&sink, batch).unwrap(), 2);
        assert_eq!(*sink.calls.borrow(), vec![2]);
    }

    #[test]
    fn upload_failure_names_roi() {
        let sink = Sink {
            calls: RefCell::new(Vec::new()),
            fail: true,
        };
        let mut batch = AnnotationBatch::new(RoiId(9));
        builder().append(&mut batch, square(), None);

        match upload_batch(&sink, batch) {
            Err(JobError::Upload { roi, count, .. }) => {
                assert_eq!(roi, RoiId(9));
                assert_eq!(count, 1);
            }
            other => panic!("expected upload error, got {:?}", other),
        }
    }
}
