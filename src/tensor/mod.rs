pub mod data_type;
pub mod layout;
pub mod tensor_desc;
pub mod tensor_init;
