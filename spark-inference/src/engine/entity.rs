use hashbrown::HashMap;
use ndarray::{ArcArray, ArrayViewD, IxDyn};

/// A named-tensor map as exchanged with an inference session.
pub type TensorMap = HashMap<String, TensorValue>;

/// Tensor data is reference counted; clones share one buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum TensorValue {
    Float(ArcArray<f32, IxDyn>),
    Int(ArcArray<i64, IxDyn>),
}

impl TensorValue {
    pub fn zeros(shape: &[usize]) -> Self {
        TensorValue::Float(ArcArray::zeros(IxDyn(shape)))
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            TensorValue::Float(array) => array.shape(),
            TensorValue::Int(array) => array.shape(),
        }
    }

    pub fn as_float(&self) -> Option<ArrayViewD<'_, f32>> {
        match self {
            TensorValue::Float(array) => Some(array.view()),
            TensorValue::Int(_) => None,
        }
    }
}

impl<D: ndarray::Dimension> From<ndarray::Array<f32, D>> for TensorValue {
    fn from(value: ndarray::Array<f32, D>) -> Self {
        TensorValue::Float(value.into_dyn().into_shared())
    }
}

impl<D: ndarray::Dimension> From<ndarray::Array<i64, D>> for TensorValue {
    fn from(value: ndarray::Array<i64, D>) -> Self {
        TensorValue::Int(value.into_dyn().into_shared())
    }
}

/// Looks a tensor up by an ordered list of aliases; the first present name wins.
pub fn find_by_alias<'a, S: AsRef<str>>(
    tensors: &'a TensorMap,
    aliases: &[S],
) -> Option<(&'a str, &'a TensorValue)> {
    aliases.iter().find_map(|alias| {
        tensors
            .get_key_value(alias.as_ref())
            .map(|(name, value)| (name.as_str(), value))
    })
}

/// Like [`find_by_alias`] but moves the tensor out of the map.
pub fn take_by_alias<S: AsRef<str>>(
    tensors: &mut TensorMap,
    aliases: &[S],
) -> Option<TensorValue> {
    aliases
        .iter()
        .find_map(|alias| tensors.remove(alias.as_ref()))
}

pub(crate) fn tensor_names(tensors: &TensorMap) -> Vec<String> {
    let mut names = tensors.keys().cloned().collect::<Vec<_>>();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn alias_lookup_prefers_earlier_names() {
        let mut tensors = TensorMap::new();
        tensors.insert("image_embeddings".into(), array![1f32].into());
        tensors.insert("image_embed".into(), array![2f32].into());

        let (name, _) = find_by_alias(&tensors, &["image_embed", "image_embeddings"]).unwrap();
        assert_eq!(name, "image_embed");

        let (name, _) = find_by_alias(&tensors, &["missing", "image_embeddings"]).unwrap();
        assert_eq!(name, "image_embeddings");

        assert!(find_by_alias(&tensors, &["missing"]).is_none());
    }

    #[test]
    fn take_removes_only_the_match() {
        let mut tensors = TensorMap::new();
        tensors.insert("iou_scores".into(), array![0.5f32].into());
        tensors.insert("masks".into(), array![0f32].into());

        let taken = take_by_alias(&mut tensors, &["iou_predictions", "iou_scores"]);
        assert!(taken.is_some());
        assert_eq!(tensor_names(&tensors), vec!["masks".to_string()]);
    }

    #[test]
    fn zeros_has_requested_shape() {
        let tensor = TensorValue::zeros(&[1, 32, 4, 4]);
        assert_eq!(tensor.shape(), &[1, 32, 4, 4]);
        assert!(tensor.as_float().unwrap().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn clones_share_storage() {
        let tensor: TensorValue = ndarray::Array3::<f32>::ones((1, 8, 8)).into();
        let copy = tensor.clone();
        assert_eq!(
            tensor.as_float().unwrap().as_ptr(),
            copy.as_float().unwrap().as_ptr()
        );
    }
}
