pub mod object_version;
