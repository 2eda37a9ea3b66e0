#![allow(dead_code)] // Only doc tests live here
