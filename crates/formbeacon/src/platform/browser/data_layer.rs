use formbeacon_protocol::DataLayerEntry;
use js_sys::{Array, JSON, Reflect};
use wasm_bindgen::{JsCast, JsValue};
use web_sys::Window;

use crate::tracker::{EventSink, SinkError};

use super::js_error;

const DATA_LAYER: &str = "dataLayer";

/// `window.dataLayer`, created on first push when the page has none.
pub struct DataLayerSink {
    window: Window,
}

impl DataLayerSink {
    pub fn new(window: Window) -> Self {
        Self { window }
    }

    fn data_layer(&self) -> Result<Array, SinkError> {
        let key = JsValue::from_str(DATA_LAYER);
        let existing = Reflect::get(&self.window, &key).map_err(|_| SinkError::Unavailable)?;
        if let Ok(array) = existing.dyn_into::<Array>() {
            return Ok(array);
        }
        let array = Array::new();
        Reflect::set(&self.window, &key, &array).map_err(|_| SinkError::Unavailable)?;
        Ok(array)
    }
}

impl EventSink for DataLayerSink {
    fn push(&self, entry: DataLayerEntry) -> Result<(), SinkError> {
        let data_layer = self.data_layer()?;
        let json = entry.to_value().to_string();
        let value = JSON::parse(&json).map_err(|error| SinkError::Rejected(js_error(error)))?;
        data_layer.push(&value);
        Ok(())
    }
}
